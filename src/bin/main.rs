// Web-of-trust database (wotdb)
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2023-2024 by
//     Cypher<cypher@cyphernet.io>
//
// Copyright 2023-2024 Cyphernet DAO, Switzerland
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[macro_use]
extern crate clap;

use std::path::PathBuf;
use std::{fs, io};

use clap::{Parser, ValueHint};
use wotdb::{Context, InMemoryStore, TrustOptions};
use wotdb::crypto::ristretto::RistrettoKeyring;

pub const DEFAULT_MARGINALS_NEEDED: u32 = 3;
pub const DEFAULT_COMPLETES_NEEDED: u32 = 1;
pub const DEFAULT_MAX_CERT_DEPTH: u32 = 5;

#[derive(Parser, Clone, Eq, PartialEq, Debug)]
#[command(author, version, about = "Web-of-trust database command-line tool", long_about = Some("Maintains a record-oriented graph of public keys, user identities and \
certifying signatures, and computes per-key trust levels by walking that \
graph toward a set of locally-held ultimate-trust roots."))]
pub struct Cli {
    /// Produce verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory holding the trust database.
    #[arg(
        short,
        long,
        global = true,
        default_value = wotdb::config::DATA_DIR,
        env = wotdb::config::DATA_DIR_ENV,
        value_hint = ValueHint::DirPath
    )]
    pub data_dir: PathBuf,

    /// Number of marginally-trusted certifiers required for FULLY (spec
    /// §4.6's `marginals_needed`).
    #[arg(long, default_value_t = DEFAULT_MARGINALS_NEEDED)]
    pub marginals_needed: u32,

    /// Number of fully-trusted certifiers required for FULLY (spec §4.6's
    /// `completes_needed`).
    #[arg(long, default_value_t = DEFAULT_COMPLETES_NEEDED)]
    pub completes_needed: u32,

    /// Maximum certification-chain depth the trust evaluator will recurse
    /// (spec §4.6's `max_cert_depth`).
    #[arg(long, default_value_t = DEFAULT_MAX_CERT_DEPTH)]
    pub max_cert_depth: u32,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn process(&mut self) -> io::Result<()> {
        self.data_dir = wotdb::config::resolve_data_dir(&self.data_dir)?;
        Ok(())
    }

    fn trust_options(&self) -> TrustOptions {
        TrustOptions {
            completes_needed: self.completes_needed,
            marginals_needed: self.marginals_needed,
            max_cert_depth: self.max_cert_depth,
        }
    }
}

#[derive(Subcommand, Clone, Eq, PartialEq, Debug)]
pub enum Command {
    /// Initialize the trust database from the locally held secret keys
    /// (spec §4.3: populates the ultimate-root registry).
    InitTrustdb {},

    /// Re-verify every stored key's signature graph against freshly
    /// fetched keyblocks (spec §4.4/§4.5).
    UpdateTrustdb {},

    /// Compute the trust level of a single key by fingerprint (spec §4.6).
    CheckTrust {
        /// Hex-encoded fingerprint of the key to evaluate.
        fingerprint: String,
    },

    /// Print the certification path(s) reaching a key (spec §9's "second
    /// trust walker").
    ListTrustpath {
        /// Hex-encoded fingerprint of the key to evaluate.
        fingerprint: String,
    },

    /// Export every non-zero owner-trust assignment (spec §4.7).
    ExportOwnertrust {
        /// Destination file; `-` writes to stdout.
        #[clap(value_hint = ValueHint::FilePath)]
        out: PathBuf,
    },

    /// Import owner-trust assignments previously produced by
    /// `export-ownertrust` (spec §4.7).
    ImportOwnertrust {
        /// Source file; `-` reads from stdin.
        #[clap(value_hint = ValueHint::FilePath)]
        input: PathBuf,
    },
}

fn main() -> io::Result<()> {
    let mut cli = Cli::parse();
    cli.process()?;
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    // The on-disk page-file store and a real OpenPGP keyring are external
    // collaborators this crate only consumes through the `RecordStore`/
    // `Keyring` traits (spec §1) — it does not ship either. The in-memory
    // backends stand in for them here, so every invocation starts from an
    // empty database; a deployment wires its own store/keyring into
    // `Context` instead of these.
    let store = InMemoryStore::new();
    let keyring = RistrettoKeyring::new();
    let ctx = Context::bootstrap(&store, &keyring, cli.trust_options())
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

    match cli.command {
        Command::InitTrustdb {} => {
            println!("ultimate-root registry: {} key(s)", ctx.registry().len());
        }
        Command::ExportOwnertrust { out } => {
            if out == PathBuf::from("-") {
                ctx.export_ownertrust(&mut io::stdout())
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
            } else {
                let mut file = fs::File::create(&out)?;
                ctx.export_ownertrust(&mut file)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
            }
        }
        Command::ImportOwnertrust { input } => {
            let stats = if input == PathBuf::from("-") {
                let mut reader = io::BufReader::new(io::stdin());
                ctx.import_ownertrust(&mut reader)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?
            } else {
                let mut reader = io::BufReader::new(fs::File::open(&input)?);
                ctx.import_ownertrust(&mut reader)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?
            };
            println!(
                "updated {}, inserted {}, skipped {}",
                stats.updated, stats.inserted, stats.skipped
            );
        }
        // These need a real keyblock source (a parsed OpenPGP keyring or a
        // fetched public keyblock) to do anything useful; spec §1 scopes
        // that parser out of this crate's responsibility.
        Command::UpdateTrustdb {} | Command::CheckTrust { .. } | Command::ListTrustpath { .. } => {
            todo!("wire a real Keyring/RecordStore backend to drive this command")
        }
    }

    Ok(())
}
