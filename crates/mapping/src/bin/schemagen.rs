//! Generates yaml JSON schemas for the mapping documents.
//! Writes into the directory named by the `SCHEMA_DIR` environment variable.
use std::{fs::File, io::Write, path};

use kindex_mapping::{mapping_schema, vocabulary_schema};

#[allow(clippy::unwrap_used)]
fn main() {
    let dir = std::env::var_os("SCHEMA_DIR").unwrap();

    let outputs = [
        ("status-mapping.schema.yaml", mapping_schema()),
        ("status-vocabulary.schema.yaml", vocabulary_schema()),
    ];

    for (name, schema) in outputs {
        let rendered = serde_yaml::to_string(&schema).unwrap();
        let mut file = File::create(path::Path::new(&dir).join(name)).unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
    }
}
