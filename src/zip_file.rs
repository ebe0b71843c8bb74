//! DFU package reader: extracts the init packet (`.dat`) and firmware image
//! (`.bin`) named in `manifest.json` from a Nordic DFU `.zip` (spec §4.6).
//!
//! Grounded in the teacher's `zip_file.rs`, kept with its single-`application`
//! assumption: spec.md doesn't ask for the combined softdevice+bootloader
//! component variant `lxndrd-nrfdfu-ble/src/package.rs` also supports, so that
//! branch of the manifest isn't read here.

use std::fs::File;
use std::io::Read;

use serde::Deserialize;
use zip::ZipArchive;

use crate::error::DfuError;

#[derive(Debug, Deserialize)]
struct Application {
    dat_file: String,
    bin_file: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    application: Application,
}

#[derive(Debug, Deserialize)]
struct OuterManifest {
    manifest: Manifest,
}

/// Read `path` as a DFU package and return `(dat, bin)` byte contents.
pub fn read_zip_file(path: &str) -> Result<(Vec<u8>, Vec<u8>), DfuError> {
    let reader = File::open(path)?;
    let mut archive = ZipArchive::new(reader)?;

    let application = {
        let mut file = archive.by_name("manifest.json")?;
        let mut manifest_string = String::new();
        file.read_to_string(&mut manifest_string)?;
        let outer: OuterManifest = serde_json::from_str(&manifest_string)?;
        outer.manifest.application
    };

    let dat = read_member(&mut archive, &application.dat_file)?;
    let bin = read_member(&mut archive, &application.bin_file)?;
    Ok((dat, bin))
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>, DfuError> {
    let mut file = archive.by_name(name)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}
