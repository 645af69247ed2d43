//! # cbt2git
//!
//! Turns CBT Tape archives (zipped TSO XMIT transmissions of partitioned
//! datasets) into plain directory trees that can live in git, keeping the
//! dataset attributes and ISPF member statistics a mainframe needs to take
//! them back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐
//! │  fetch   │──▶│  stage   │──▶│  unpack   │──▶│  layout  │──▶│   git   │
//! │ mirror   │   │ CBT*.zip │   │ XMIT/PDS  │   │ tree+ISPF│   │ + forge │
//! └──────────┘   └──────────┘   └─────┬─────┘   └──────────┘   └─────────┘
//!                                     │
//!                                     ▼
//!                               ┌──────────┐
//!                               │   scan   │──▶ catalog (SQLite)
//!                               └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cbt2git init                         # create the catalog
//! cbt2git fetch --updates              # download updated archives
//! cbt2git convert                      # build and commit changed archives
//! cbt2git scan --output catalog.json   # catalog every staged archive
//! cbt2git unpack CBT001.zip --into out # one archive, no git
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ebcdic`] | Code page 1047 conversion |
//! | [`xmit`] | NETDATA segments, control records and text units |
//! | [`iebcopy`] | Unloaded partitioned datasets and ISPF statistics |
//! | [`sniff`] | Media type detection for member content |
//! | [`reader`] | One container into a descriptor plus members |
//! | [`classify`] | Layout policy per media type |
//! | [`unpack`] | Recursive decoding of nested containers |
//! | [`layout`] | Output tree, dsn and ISPF ledgers |
//! | [`scan`] | Catalog rows without building |
//! | [`decode_log`] | Timestamped per-archive and batch logs |
//! | [`toc`] | `UPDATESTOC.txt` parsing |
//! | [`fetch`] | Remote mirror and stage refresh |
//! | [`stage`] | Staged archives and change detection |
//! | [`git`] | Commits, hosted repositories, pushes |
//! | [`catalog`] | Archive and scan records |
//! | [`convert`] | Batch conversion |
//! | [`report`] | Scan reports |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod classify;
pub mod config;
pub mod convert;
pub mod db;
pub mod decode_log;
pub mod ebcdic;
pub mod error;
pub mod fetch;
pub mod git;
pub mod iebcopy;
pub mod layout;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reader;
pub mod report;
pub mod scan;
pub mod sniff;
pub mod stage;
pub mod toc;
pub mod unpack;
pub mod xmit;
