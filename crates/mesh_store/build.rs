use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=schema_manifest.json");
    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("OUT_DIR is not set"))?;
    let payload = fs::read_to_string("schema_manifest.json")?;
    fs::write(out_dir.join("schema_manifest.json"), payload)?;
    Ok(())
}
