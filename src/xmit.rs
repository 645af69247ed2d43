//! NETDATA framing used by TSO TRANSMIT ("XMIT") containers.
//!
//! A container is a stream of segments, each `len(1) flags(1) data(len-2)`.
//! Segments are joined into logical records; control records (`INMR01`..
//! `INMR07`) describe the transmission and the files it carries, every other
//! record is payload belonging to the file announced by the last `INMR03`.

use std::collections::BTreeMap;

use crate::ebcdic;
use crate::error::{Error, Result};

const FLAG_FIRST: u8 = 0x80;
const FLAG_LAST: u8 = 0x40;
const FLAG_CONTROL: u8 = 0x20;

/// EBCDIC `INMR01`, the identifier every container starts with.
pub const INMR01: [u8; 6] = [0xC9, 0xD5, 0xD4, 0xD9, 0xF0, 0xF1];

/// Text unit keys.
pub mod keys {
    pub const INMDSNAM: u16 = 0x0002;
    pub const INMBLKSZ: u16 = 0x0030;
    pub const INMDSORG: u16 = 0x003C;
    pub const INMLRECL: u16 = 0x0042;
    pub const INMRECFM: u16 = 0x0049;
    pub const INMFNODE: u16 = 0x1011;
    pub const INMFUID: u16 = 0x1012;
    pub const INMFTIME: u16 = 0x1024;
    pub const INMUTILN: u16 = 0x1028;
    pub const INMSIZE: u16 = 0x102C;
    pub const INMNUMF: u16 = 0x102F;
}

pub const DSORG_PARTITIONED: u16 = 0x0200;
pub const DSORG_SEQUENTIAL: u16 = 0x4000;
pub const DSORG_VSAM: u16 = 0x0008;

/// Whether `bytes` starts like a transmission container.
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && bytes[2..8] == INMR01
}

/// Render a RECFM byte (`DS1RECFM`, or the high byte of `INMRECFM`).
pub fn record_format_name(bits: u8) -> String {
    let base = match bits & 0xC0 {
        0xC0 => "U",
        0x80 => "F",
        0x40 => "V",
        _ => return "n.a.".to_string(),
    };
    let mut name = base.to_string();
    if bits & 0x10 != 0 {
        name.push('B');
    }
    if bits & 0x08 != 0 {
        name.push('S');
    }
    if bits & 0x04 != 0 {
        name.push('A');
    }
    if bits & 0x02 != 0 {
        name.push('M');
    }
    name
}

/// Key → values map decoded from a run of text units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextUnits(BTreeMap<u16, Vec<Vec<u8>>>);

impl TextUnits {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut units = BTreeMap::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes.len() - pos < 4 {
                if bytes[pos..].iter().all(|&b| b == 0) {
                    break;
                }
                return Err(Error::MalformedContainer(format!(
                    "truncated text unit at offset {}",
                    pos
                )));
            }
            let key = be16(&bytes[pos..]);
            let count = be16(&bytes[pos + 2..]) as usize;
            pos += 4;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                if pos + 2 > bytes.len() {
                    return Err(Error::MalformedContainer(format!(
                        "text unit {:04X} is missing a length field",
                        key
                    )));
                }
                let len = be16(&bytes[pos..]) as usize;
                pos += 2;
                if pos + len > bytes.len() {
                    return Err(Error::MalformedContainer(format!(
                        "text unit {:04X} overruns its record",
                        key
                    )));
                }
                values.push(bytes[pos..pos + len].to_vec());
                pos += len;
            }
            units.insert(key, values);
        }
        Ok(Self(units))
    }

    pub fn get(&self, key: u16) -> Option<&[Vec<u8>]> {
        self.0.get(&key).map(|v| v.as_slice())
    }

    /// First value of `key` as a big-endian unsigned number.
    pub fn number(&self, key: u16) -> Option<u32> {
        let value = self.get(key)?.first()?;
        if value.is_empty() || value.len() > 4 {
            return None;
        }
        Some(value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }

    /// First value of `key` as EBCDIC text.
    pub fn text(&self, key: u16) -> Option<String> {
        self.get(key)?.first().map(|v| ebcdic::decode_field(v))
    }

    /// `INMDSNAM` qualifiers joined with dots.
    pub fn dataset_name(&self) -> Option<String> {
        let qualifiers = self.get(keys::INMDSNAM)?;
        let name = qualifiers
            .iter()
            .map(|q| ebcdic::decode_field(q))
            .filter(|q| !q.is_empty())
            .collect::<Vec<_>>()
            .join(".");
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn utility(&self) -> Option<String> {
        self.text(keys::INMUTILN)
    }
}

/// One `INMR02` record: a file number and the attributes one utility saw.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub number: u32,
    pub units: TextUnits,
}

/// A parsed transmission: header units, per-file headers and payload.
#[derive(Debug, Clone, Default)]
pub struct Transmission {
    pub header: TextUnits,
    pub files: Vec<FileHeader>,
    /// Payload records, one section per `INMR03`, in file order.
    pub sections: Vec<Vec<Vec<u8>>>,
}

impl Transmission {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut transmission = Transmission::default();
        let mut seen_header = false;
        let mut record: Vec<u8> = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let len = bytes[pos] as usize;
            if len < 2 {
                return Err(Error::MalformedContainer(if seen_header {
                    format!("invalid segment length {} at offset {}", len, pos)
                } else {
                    "leading directory record is not a NETDATA segment".to_string()
                }));
            }
            if pos + len > bytes.len() {
                return Err(Error::MalformedContainer(format!(
                    "segment at offset {} overruns the container",
                    pos
                )));
            }
            let flags = bytes[pos + 1];
            if flags & FLAG_FIRST != 0 {
                record.clear();
            }
            record.extend_from_slice(&bytes[pos + 2..pos + len]);
            pos += len;
            if flags & FLAG_LAST == 0 {
                continue;
            }

            let complete = std::mem::take(&mut record);
            if flags & FLAG_CONTROL != 0 {
                if transmission.apply_control(&complete, &mut seen_header)? {
                    break;
                }
            } else if !seen_header {
                return Err(Error::MalformedContainer(
                    "leading directory record is not INMR01".to_string(),
                ));
            } else {
                match transmission.sections.last_mut() {
                    Some(section) => section.push(complete),
                    None => {
                        return Err(Error::MalformedContainer(
                            "data record before INMR03".to_string(),
                        ))
                    }
                }
            }
        }

        if !seen_header {
            return Err(Error::MalformedContainer(
                "leading directory record missing".to_string(),
            ));
        }
        Ok(transmission)
    }

    /// Returns `true` once `INMR06` ends the transmission.
    fn apply_control(&mut self, record: &[u8], seen_header: &mut bool) -> Result<bool> {
        if record.len() < 6 {
            return Err(Error::MalformedContainer(
                "control record shorter than its identifier".to_string(),
            ));
        }
        let id = ebcdic::decode(&record[..6]);
        if !*seen_header && id != "INMR01" {
            return Err(Error::MalformedContainer(format!(
                "leading directory record is {:?}, expected INMR01",
                id
            )));
        }
        match id.as_str() {
            "INMR01" => {
                self.header = TextUnits::parse(&record[6..])?;
                *seen_header = true;
            }
            "INMR02" => {
                if record.len() < 10 {
                    return Err(Error::MalformedContainer(
                        "INMR02 without a file number".to_string(),
                    ));
                }
                let number = u32::from_be_bytes([record[6], record[7], record[8], record[9]]);
                let units = TextUnits::parse(&record[10..])?;
                self.files.push(FileHeader { number, units });
            }
            "INMR03" => self.sections.push(Vec::new()),
            "INMR06" => return Ok(true),
            "INMR04" | "INMR07" => {}
            other => {
                return Err(Error::MalformedContainer(format!(
                    "unknown control record {:?}",
                    other
                )))
            }
        }
        Ok(false)
    }

    pub fn headers_for(&self, number: u32) -> impl Iterator<Item = &FileHeader> {
        self.files.iter().filter(move |f| f.number == number)
    }

    /// Dataset name of a file, taken from its first INMR02 that has one.
    pub fn dataset_name(&self, number: u32) -> Option<String> {
        self.headers_for(number)
            .find_map(|h| h.units.dataset_name())
    }

    /// The file carrying the dataset: file 1, else file 2.
    pub fn dataset_file(&self) -> Result<(u32, String)> {
        [1, 2]
            .into_iter()
            .find_map(|n| self.dataset_name(n).map(|name| (n, name)))
            .ok_or(Error::NoDataset)
    }

    /// Whether the file was unloaded by IEBCOPY (a partitioned dataset).
    pub fn is_unloaded_pds(&self, number: u32) -> bool {
        self.headers_for(number)
            .any(|h| h.units.utility().as_deref() == Some("IEBCOPY"))
    }

    pub fn records_for(&self, number: u32) -> &[Vec<u8>] {
        (number as usize)
            .checked_sub(1)
            .and_then(|i| self.sections.get(i))
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }
}

pub(crate) fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}
