//! services/api/src/bin/openapi.rs
//!
//! Prints the OpenAPI document for the chat API. With a path argument the
//! document is written to that file instead; `-` means stdout.

use api_lib::web::rest::ApiDoc;
use std::io::Write;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = ApiDoc::openapi().to_pretty_json()?;
    match std::env::args().nth(1).filter(|arg| arg != "-") {
        Some(path) => {
            std::fs::write(&path, spec_json)?;
            eprintln!("OpenAPI document written to {}", path);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(spec_json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
