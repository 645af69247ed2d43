//! Transmission-container reader.
//!
//! Turns the bytes of one XMIT container into a [`ContainerDescriptor`] plus
//! either its members (partitioned) or its content (sequential). Nested
//! containers are only recognised here; decoding them is the unpacker's job.

use crate::error::Result;
use crate::iebcopy::Unload;
use crate::models::{ContainerDescriptor, Member, Organization, SequentialContent};
use crate::sniff;
use crate::xmit::{self, keys, Transmission, DSORG_PARTITIONED};

/// One decoded container level.
#[derive(Debug, Clone)]
pub struct Container {
    pub descriptor: ContainerDescriptor,
    pub members: Vec<Member>,
    pub content: Option<SequentialContent>,
}

pub fn read(bytes: &[u8]) -> Result<Container> {
    let transmission = Transmission::parse(bytes)?;
    let (file, dataset_name) = transmission.dataset_file()?;
    let records = transmission.records_for(file);

    if transmission.is_unloaded_pds(file) {
        let unload = Unload::parse(records)?;
        let descriptor = ContainerDescriptor {
            dataset_name,
            organization: if unload.header.is_partitioned() {
                Organization::Partitioned
            } else {
                Organization::Sequential
            },
            record_format: unload.header.record_format_name(),
            record_length: unload.header.record_length,
            block_size: unload.header.block_size,
        };
        let line_oriented = !descriptor.is_undefined_format();
        let members = unload
            .members
            .into_iter()
            .map(|m| {
                let sniffed = sniff::sniff(&m.records, line_oriented);
                Member {
                    edit_stats: m.entry.edit_stats(),
                    name: m.entry.name,
                    extension: sniffed.extension.to_string(),
                    media_type: sniffed.media_type.to_string(),
                    data: sniffed.data,
                }
            })
            .collect();
        return Ok(Container {
            descriptor,
            members,
            content: None,
        });
    }

    let attr = |key| {
        transmission
            .headers_for(file)
            .find_map(|h| h.units.number(key))
    };
    let organization = match attr(keys::INMDSORG) {
        Some(dsorg) if dsorg as u16 & DSORG_PARTITIONED != 0 => Organization::Partitioned,
        _ => Organization::Sequential,
    };
    let record_format = attr(keys::INMRECFM)
        .map(|bits| xmit::record_format_name((bits >> 8) as u8))
        .unwrap_or_else(|| "n.a.".to_string());
    let descriptor = ContainerDescriptor {
        dataset_name,
        organization,
        record_length: attr(keys::INMLRECL).unwrap_or(0),
        block_size: attr(keys::INMBLKSZ).unwrap_or(0),
        record_format,
    };
    let sniffed = sniff::sniff(records, !descriptor.is_undefined_format());
    Ok(Container {
        descriptor,
        members: Vec::new(),
        content: Some(SequentialContent {
            media_type: sniffed.media_type.to_string(),
            extension: sniffed.extension.to_string(),
            data: sniffed.data,
        }),
    })
}
