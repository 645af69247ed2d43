//! Builders for synthetic transmissions, unloads and distribution zips.

#![allow(dead_code)]

use std::io::Write;

use cbt2git::ebcdic;
use cbt2git::xmit::keys;

const FIRST: u8 = 0x80;
const LAST: u8 = 0x40;
const CONTROL: u8 = 0x20;
const SEGMENT_DATA: usize = 253;

pub const RECFM_FB: u8 = 0x90;
pub const RECFM_VB: u8 = 0x50;
pub const RECFM_U: u8 = 0xC0;

/// One member of a partitioned dataset under construction.
pub struct MemberSpec {
    pub name: String,
    pub data: Vec<u8>,
    pub user_data: Vec<u8>,
}

impl MemberSpec {
    /// EBCDIC text, one fixed-length record per line.
    pub fn text(name: &str, lines: &[&str]) -> Self {
        Self::raw(name, fixed_text(lines, 80))
    }

    pub fn raw(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
            user_data: Vec::new(),
        }
    }

    pub fn with_stats(mut self, user_data: Vec<u8>) -> Self {
        self.user_data = user_data;
        self
    }
}

pub fn fixed_text(lines: &[&str], lrecl: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        let mut record = ebcdic::encode(&format!("{:<width$}", line, width = lrecl));
        record.truncate(lrecl);
        out.extend(record);
    }
    out
}

/// ISPF statistics: version 1.2, created 2019-05-03, modified
/// 2020-02-14 13:37:42, 12/10/3 lines, user IBMUSER.
pub fn ispf_stats() -> Vec<u8> {
    let mut ud = vec![1, 2, 0x00, 0x42];
    ud.extend([0x01, 0x19, 0x12, 0x3F]);
    ud.extend([0x01, 0x20, 0x04, 0x5F]);
    ud.extend([0x13, 0x37]);
    ud.extend(12u16.to_be_bytes());
    ud.extend(10u16.to_be_bytes());
    ud.extend(3u16.to_be_bytes());
    ud.extend(ebcdic::encode("IBMUSER "));
    ud.extend([0, 0]);
    ud
}

fn text_unit(key: u16, values: &[Vec<u8>]) -> Vec<u8> {
    let mut out = key.to_be_bytes().to_vec();
    out.extend((values.len() as u16).to_be_bytes());
    for v in values {
        out.extend((v.len() as u16).to_be_bytes());
        out.extend_from_slice(v);
    }
    out
}

fn qualifiers(dataset: &str) -> Vec<Vec<u8>> {
    dataset.split('.').map(ebcdic::encode).collect()
}

/// Split one logical record into NETDATA segments.
fn segments(record: &[u8], control: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let chunks: Vec<&[u8]> = if record.is_empty() {
        vec![&[][..]]
    } else {
        record.chunks(SEGMENT_DATA).collect()
    };
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.iter().enumerate() {
        let mut flags = 0;
        if i == 0 {
            flags |= FIRST;
        }
        if i == last {
            flags |= LAST;
        }
        if control {
            flags |= CONTROL;
        }
        out.push((chunk.len() + 2) as u8);
        out.push(flags);
        out.extend_from_slice(chunk);
    }
    out
}

fn control(id: &str, body: &[u8]) -> Vec<u8> {
    let mut record = ebcdic::encode(id);
    record.extend_from_slice(body);
    segments(&record, true)
}

fn inmr02(file: u32, units: &[Vec<u8>]) -> Vec<u8> {
    let mut body = file.to_be_bytes().to_vec();
    for u in units {
        body.extend_from_slice(u);
    }
    control("INMR02", &body)
}

fn header() -> Vec<u8> {
    let units = [
        text_unit(keys::INMFNODE, &[ebcdic::encode("NODE")]),
        text_unit(keys::INMFUID, &[ebcdic::encode("CBTTAPE")]),
        text_unit(keys::INMNUMF, &[vec![0, 0, 0, 1]]),
    ]
    .concat();
    control("INMR01", &units)
}

fn finish(mut out: Vec<u8>, records: &[Vec<u8>]) -> Vec<u8> {
    out.extend(control("INMR03", &[]));
    for record in records {
        out.extend(segments(record, false));
    }
    out.extend(control("INMR06", &[]));
    // card padding
    let pad = (80 - out.len() % 80) % 80;
    out.extend(std::iter::repeat(0x40).take(pad));
    out
}

/// A transmitted partitioned dataset unloaded by IEBCOPY.
pub fn pds_xmit(dataset: &str, recfm: u8, lrecl: u16, members: &[MemberSpec]) -> Vec<u8> {
    let blksize: u16 = if recfm & 0xC0 == 0x80 { lrecl * 10 } else { 6144 };
    let mut out = header();
    out.extend(inmr02(
        1,
        &[
            text_unit(keys::INMUTILN, &[ebcdic::encode("IEBCOPY")]),
            text_unit(keys::INMDSNAM, &qualifiers(dataset)),
            text_unit(keys::INMDSORG, &[0x0200u16.to_be_bytes().to_vec()]),
            text_unit(keys::INMLRECL, &[lrecl.to_be_bytes().to_vec()]),
            text_unit(keys::INMBLKSZ, &[blksize.to_be_bytes().to_vec()]),
        ],
    ));
    out.extend(inmr02(
        1,
        &[text_unit(keys::INMUTILN, &[ebcdic::encode("INMCOPY")])],
    ));
    finish(out, &unload(recfm, lrecl, blksize, members))
}

/// A transmitted sequential dataset.
pub fn seq_xmit(dataset: &str, recfm: u8, lrecl: u16, records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = header();
    out.extend(inmr02(
        1,
        &[
            text_unit(keys::INMUTILN, &[ebcdic::encode("INMCOPY")]),
            text_unit(keys::INMDSNAM, &qualifiers(dataset)),
            text_unit(keys::INMDSORG, &[0x4000u16.to_be_bytes().to_vec()]),
            text_unit(keys::INMLRECL, &[lrecl.to_be_bytes().to_vec()]),
            text_unit(keys::INMBLKSZ, &[(lrecl * 10).to_be_bytes().to_vec()]),
            text_unit(keys::INMRECFM, &[vec![recfm, 0x00]]),
        ],
    ));
    finish(out, records)
}

/// COPYR1, COPYR2, directory and member data as unload records.
fn unload(recfm: u8, lrecl: u16, blksize: u16, members: &[MemberSpec]) -> Vec<Vec<u8>> {
    let mut copyr1 = vec![0x00, 0xCA, 0x6D, 0x0F];
    copyr1.extend(0x0200u16.to_be_bytes());
    copyr1.extend(blksize.to_be_bytes());
    copyr1.extend(lrecl.to_be_bytes());
    copyr1.push(recfm);
    copyr1.extend([0u8; 45]);
    let copyr2 = vec![0u8; 276];

    let mut stream = directory(members);
    for member in members {
        let block_len = match recfm & 0xC0 {
            0x80 => blksize as usize,
            _ => 800,
        };
        for block in member.data.chunks(block_len.max(1)) {
            stream.extend(data_block(block));
        }
        stream.extend(data_block(&[]));
    }

    let mut records = vec![copyr1, copyr2];
    records.extend(stream.chunks(1000).map(|c| c.to_vec()));
    records
}

fn directory(members: &[MemberSpec]) -> Vec<u8> {
    let mut blocks = Vec::new();
    let mut data = Vec::new();
    for (i, member) in members.iter().enumerate() {
        let mut entry = ebcdic::encode(&format!("{:<8}", member.name));
        entry.truncate(8);
        let ttr = (i as u32 + 1) << 8;
        entry.extend(&ttr.to_be_bytes()[1..]);
        entry.push((member.user_data.len() / 2) as u8);
        entry.extend_from_slice(&member.user_data);
        if data.len() + entry.len() > 254 - 12 {
            blocks.extend(directory_block(&data));
            data.clear();
        }
        data.extend(entry);
    }
    data.extend([0xFF; 8]);
    data.extend([0u8; 4]);
    blocks.extend(directory_block(&data));
    blocks
}

fn directory_block(entries: &[u8]) -> Vec<u8> {
    let mut block = vec![0u8; 12];
    block.extend([0xFF; 8]);
    block.extend(((entries.len() + 2) as u16).to_be_bytes());
    block.extend_from_slice(entries);
    block.resize(276, 0);
    block
}

fn data_block(bytes: &[u8]) -> Vec<u8> {
    let mut block = vec![0u8; 10];
    block.extend((bytes.len() as u16).to_be_bytes());
    block.extend_from_slice(bytes);
    block
}

/// A zip holding the given `(name, bytes)` entries.
pub fn zip_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A distribution zip wrapping one container.
pub fn distribution(entry: &str, container: &[u8]) -> Vec<u8> {
    zip_entries(&[(entry, container)])
}

pub fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

/// Starts like a transmission but breaks right after the header.
pub fn broken_xmit() -> Vec<u8> {
    let mut out = header();
    out.extend([0x00, 0x00]);
    out.resize(160, 0x40);
    out
}
