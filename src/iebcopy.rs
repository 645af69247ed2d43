//! IEBCOPY unload format, the payload of a transmitted partitioned dataset.
//!
//! The first record (`COPYR1`) carries the dataset attributes and the second
//! (`COPYR2`) device geometry. What follows is one byte stream: 276-byte
//! directory blocks up to the `X'FF..FF'` entry, then member data blocks,
//! each behind a 12-byte count field. A zero-length block ends a member.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::ebcdic;
use crate::error::{Error, Result};
use crate::models::EditStats;
use crate::xmit::{self, be16, DSORG_PARTITIONED};

/// `COPYR1` eye-catcher.
pub const COPYR1_ID: [u8; 3] = [0xCA, 0x6D, 0x0F];

const DIRECTORY_BLOCK_LEN: usize = 276;
const COUNT_LEN: usize = 12;
const KEY_LEN: usize = 8;
const END_OF_DIRECTORY: [u8; 8] = [0xFF; 8];

const ALIAS_FLAG: u8 = 0x80;
const USER_DATA_HALFWORDS: u8 = 0x1F;

const ISPF_STATS_LEN: usize = 30;
const ISPF_EXTENDED_LEN: usize = 40;
const ISPF_EXTENDED_FLAG: u8 = 0x20;

/// Attributes from `COPYR1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadHeader {
    pub dsorg: u16,
    pub block_size: u32,
    pub record_length: u32,
    pub record_format: u8,
}

impl UnloadHeader {
    pub fn parse(record: &[u8]) -> Result<Self> {
        // The id sits at offset 1, or 9 behind a BDW/RDW pair.
        let base = [1usize, 9]
            .into_iter()
            .find(|&off| record.get(off..off + 3) == Some(&COPYR1_ID[..]))
            .map(|off| off - 1)
            .ok_or_else(|| {
                Error::MalformedContainer("unload does not start with COPYR1".to_string())
            })?;
        if record.len() < base + 11 {
            return Err(Error::MalformedContainer("COPYR1 is truncated".to_string()));
        }
        Ok(Self {
            dsorg: be16(&record[base + 4..]),
            block_size: be16(&record[base + 6..]) as u32,
            record_length: be16(&record[base + 8..]) as u32,
            record_format: record[base + 10],
        })
    }

    pub fn record_format_name(&self) -> String {
        xmit::record_format_name(self.record_format)
    }

    pub fn is_partitioned(&self) -> bool {
        self.dsorg & DSORG_PARTITIONED != 0
    }

    fn record_kind(&self) -> RecordKind {
        match self.record_format & 0xC0 {
            0xC0 => RecordKind::Undefined,
            0x80 => RecordKind::Fixed(self.record_length as usize),
            0x40 => RecordKind::Variable,
            _ => RecordKind::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordKind {
    Fixed(usize),
    Variable,
    Undefined,
}

/// One PDS directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub ttr: u32,
    pub alias: bool,
    pub user_data: Vec<u8>,
}

impl DirectoryEntry {
    pub fn edit_stats(&self) -> Option<EditStats> {
        parse_ispf_stats(&self.user_data)
    }
}

/// A directory entry with the logical records of its data.
#[derive(Debug, Clone)]
pub struct UnloadedMember {
    pub entry: DirectoryEntry,
    pub records: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Unload {
    pub header: UnloadHeader,
    /// In directory order.
    pub members: Vec<UnloadedMember>,
}

impl Unload {
    pub fn parse(records: &[Vec<u8>]) -> Result<Self> {
        let (copyr1, rest) = records
            .split_first()
            .ok_or_else(|| Error::MalformedContainer("unload has no records".to_string()))?;
        let header = UnloadHeader::parse(copyr1)?;

        let stream: Vec<u8> = rest.iter().skip(1).flatten().copied().collect();
        let (entries, data_start) = read_directory(&stream)?;
        let data = read_member_data(&stream[data_start..])?;

        // Data is unloaded in TTR order; aliases point at their target's TTR.
        let mut ttrs: Vec<u32> = entries.iter().map(|e| e.ttr).collect();
        ttrs.sort_unstable();
        ttrs.dedup();
        let by_ttr: BTreeMap<u32, &Vec<Vec<u8>>> = ttrs.into_iter().zip(data.iter()).collect();

        let kind = header.record_kind();
        let members = entries
            .into_iter()
            .map(|entry| {
                let records = by_ttr
                    .get(&entry.ttr)
                    .map(|blocks| split_records(blocks, kind))
                    .unwrap_or_default();
                UnloadedMember { entry, records }
            })
            .collect();

        Ok(Self { header, members })
    }
}

fn read_directory(stream: &[u8]) -> Result<(Vec<DirectoryEntry>, usize)> {
    let mut entries = Vec::new();
    let mut pos = 0;
    loop {
        let block = stream.get(pos..pos + DIRECTORY_BLOCK_LEN).ok_or_else(|| {
            Error::MalformedContainer("directory ends before its last entry".to_string())
        })?;
        pos += DIRECTORY_BLOCK_LEN;

        let data = &block[COUNT_LEN + KEY_LEN..];
        let used = (be16(data) as usize).min(data.len());
        let mut off = 2;
        while off + 12 <= used {
            let name = &data[off..off + 8];
            if name == END_OF_DIRECTORY {
                return Ok((entries, pos));
            }
            let ttr = u32::from_be_bytes([0, data[off + 8], data[off + 9], data[off + 10]]);
            let c = data[off + 11];
            let end = off + 12 + 2 * (c & USER_DATA_HALFWORDS) as usize;
            if end > used {
                return Err(Error::MalformedContainer(format!(
                    "directory entry {} overruns its block",
                    ebcdic::decode_field(name)
                )));
            }
            entries.push(DirectoryEntry {
                name: ebcdic::decode_field(name),
                ttr,
                alias: c & ALIAS_FLAG != 0,
                user_data: data[off + 12..end].to_vec(),
            });
            off = end;
        }
    }
}

/// Member data as a list of physical blocks per member.
fn read_member_data(stream: &[u8]) -> Result<Vec<Vec<Vec<u8>>>> {
    let mut members = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut pos = 0;
    while pos + COUNT_LEN <= stream.len() {
        let count = &stream[pos..pos + COUNT_LEN];
        let key_len = count[9] as usize;
        let data_len = be16(&count[10..]) as usize;
        pos += COUNT_LEN;
        if key_len == 0 && data_len == 0 {
            members.push(std::mem::take(&mut current));
            continue;
        }
        if pos + key_len + data_len > stream.len() {
            return Err(Error::MalformedContainer(format!(
                "member data block at offset {} overruns the unload",
                pos - COUNT_LEN
            )));
        }
        pos += key_len;
        current.push(stream[pos..pos + data_len].to_vec());
        pos += data_len;
    }
    if !current.is_empty() {
        members.push(current);
    }
    Ok(members)
}

fn split_records(blocks: &[Vec<u8>], kind: RecordKind) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    for block in blocks {
        match kind {
            RecordKind::Fixed(lrecl) if lrecl > 0 => {
                records.extend(block.chunks(lrecl).map(|r| r.to_vec()));
            }
            RecordKind::Variable => {
                let block_len = if block.len() >= 4 {
                    (be16(block) as usize).clamp(4, block.len())
                } else {
                    block.len()
                };
                let mut p = 4;
                while p + 4 <= block_len {
                    let len = be16(&block[p..]) as usize;
                    if len < 4 || p + len > block_len {
                        break;
                    }
                    records.push(block[p + 4..p + len].to_vec());
                    p += len;
                }
            }
            RecordKind::Fixed(_) | RecordKind::Undefined => records.push(block.clone()),
        }
    }
    records
}

/// Parse ISPF statistics from directory user data.
///
/// Returns `None` when the user data is too short or carries values that are
/// not valid packed decimal dates and times.
pub fn parse_ispf_stats(user_data: &[u8]) -> Option<EditStats> {
    if user_data.len() < ISPF_STATS_LEN {
        return None;
    }
    let ud = user_data;
    let seconds = packed(&ud[3..4])?;
    let created = packed_julian(&ud[4..8])?;
    let modified = packed_julian(&ud[8..12])?;
    let hours = packed(&ud[12..13])?;
    let minutes = packed(&ud[13..14])?;

    let (current, initial, changed) =
        if ud[2] & ISPF_EXTENDED_FLAG != 0 && ud.len() >= ISPF_EXTENDED_LEN {
            (be32(&ud[28..]), be32(&ud[32..]), be32(&ud[36..]))
        } else {
            (
                be16(&ud[14..]) as u32,
                be16(&ud[16..]) as u32,
                be16(&ud[18..]) as u32,
            )
        };

    Some(EditStats {
        version_major: ud[0],
        version_minor: ud[1],
        created_at: created.and_hms_opt(0, 0, 0)?,
        modified_at: Some(NaiveDateTime::new(
            modified,
            chrono::NaiveTime::from_hms_opt(hours, minutes, seconds)?,
        )),
        original_line_count: current,
        new_line_count: initial,
        modified_line_count: changed,
        editor_id: ebcdic::decode_field(&ud[20..28]),
    })
}

fn nibbles(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0F])
}

fn packed(bytes: &[u8]) -> Option<u32> {
    nibbles(bytes).try_fold(0u32, |acc, n| (n <= 9).then(|| acc * 10 + n as u32))
}

/// `0CYYDDDF` packed Julian date.
fn packed_julian(bytes: &[u8]) -> Option<NaiveDate> {
    let n: Vec<u8> = nibbles(bytes).collect();
    if n.len() != 8 || n[..7].iter().any(|&d| d > 9) {
        return None;
    }
    let year = 1900 + 100 * n[1] as i32 + (n[2] * 10 + n[3]) as i32;
    let day = n[4] as u32 * 100 + n[5] as u32 * 10 + n[6] as u32;
    NaiveDate::from_yo_opt(year, day)
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copyr1(recfm: u8, lrecl: u16, blksize: u16) -> Vec<u8> {
        let mut r = vec![0x00];
        r.extend(COPYR1_ID);
        r.extend(DSORG_PARTITIONED.to_be_bytes());
        r.extend(blksize.to_be_bytes());
        r.extend(lrecl.to_be_bytes());
        r.push(recfm);
        r.extend([0u8; 45]);
        r
    }

    fn directory(entries: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        for (name, ttr, ud) in entries {
            let mut n = ebcdic::encode(&format!("{:<8}", name));
            n.truncate(8);
            data.extend(n);
            data.extend(&ttr.to_be_bytes()[1..]);
            data.push((ud.len() / 2) as u8);
            data.extend_from_slice(ud);
        }
        data.extend(END_OF_DIRECTORY);
        data.extend([0u8; 4]);
        let mut block = vec![0u8; COUNT_LEN];
        block.extend(END_OF_DIRECTORY);
        block.extend(((data.len() + 2) as u16).to_be_bytes());
        block.extend(data);
        block.resize(DIRECTORY_BLOCK_LEN, 0);
        block
    }

    fn data_block(bytes: &[u8]) -> Vec<u8> {
        let mut b = vec![0u8; 10];
        b.extend((bytes.len() as u16).to_be_bytes());
        b.extend_from_slice(bytes);
        b
    }

    fn stats() -> Vec<u8> {
        let mut ud = vec![1, 5, 0x00, 0x42];
        ud.extend([0x01, 0x19, 0x12, 0x3F]); // 2019 day 123
        ud.extend([0x01, 0x20, 0x04, 0x5F]); // 2020 day 45
        ud.extend([0x13, 0x37]);
        ud.extend(12u16.to_be_bytes());
        ud.extend(10u16.to_be_bytes());
        ud.extend(3u16.to_be_bytes());
        ud.extend(ebcdic::encode("IBMUSER "));
        ud.extend([0, 0]);
        ud
    }

    #[test]
    fn ispf_stats_decode_packed_fields() {
        let s = parse_ispf_stats(&stats()).unwrap();
        assert_eq!((s.version_major, s.version_minor), (1, 5));
        assert_eq!(s.created_at.to_string(), "2019-05-03 00:00:00");
        assert_eq!(s.last_touched().to_string(), "2020-02-14 13:37:42");
        assert_eq!(
            (s.original_line_count, s.new_line_count, s.modified_line_count),
            (12, 10, 3)
        );
        assert_eq!(s.editor_id, "IBMUSER");
    }

    #[test]
    fn short_or_garbled_user_data_has_no_stats() {
        assert!(parse_ispf_stats(&[0u8; 12]).is_none());
        let mut bad = stats();
        bad[4] = 0xAB;
        assert!(parse_ispf_stats(&bad).is_none());
    }

    #[test]
    fn members_follow_ttr_order_and_aliases_share_data() {
        let ud = stats();
        let mut stream = directory(&[
            ("ALIAS", 0x000200, &[]),
            ("FIRST", 0x000100, ud.as_slice()),
            ("SECOND", 0x000200, &[]),
        ]);
        stream.extend(data_block(&ebcdic::encode(&format!("{:<8}", "ONE"))));
        stream.extend(data_block(&[]));
        stream.extend(data_block(&ebcdic::encode(&format!("{:<8}{:<8}", "TWO", "THREE"))));
        stream.extend(data_block(&[]));

        let records = vec![copyr1(0x90, 8, 3120), vec![0u8; 20], stream];
        let unload = Unload::parse(&records).unwrap();
        assert!(unload.header.is_partitioned());
        assert_eq!(unload.header.record_format_name(), "FB");

        let names: Vec<&str> = unload.members.iter().map(|m| m.entry.name.as_str()).collect();
        assert_eq!(names, ["ALIAS", "FIRST", "SECOND"]);
        assert_eq!(unload.members[1].records.len(), 1);
        assert_eq!(unload.members[2].records.len(), 2);
        assert_eq!(unload.members[0].records, unload.members[2].records);
        assert!(unload.members[1].entry.edit_stats().is_some());
        assert!(unload.members[2].entry.edit_stats().is_none());
    }

    #[test]
    fn variable_blocks_split_on_rdw() {
        let mut block = vec![0, 14, 0, 0];
        block.extend([0, 6, 0, 0, 0xC1, 0xC2]);
        block.extend([0, 4, 0, 0]);
        let records = split_records(&[block], RecordKind::Variable);
        assert_eq!(records, vec![vec![0xC1, 0xC2], vec![]]);
    }

    #[test]
    fn missing_copyr1_is_malformed() {
        assert!(matches!(
            Unload::parse(&[vec![0u8; 60]]),
            Err(Error::MalformedContainer(_))
        ));
    }
}
