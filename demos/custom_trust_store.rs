//! Diagnose an endpoint while trusting the roots of a PKCS#12 trust store.
//!
//! Run with: cargo run --example custom_trust_store -- internal.example.com roots.p12 changeit

use std::path::Path;

use ssl_inspector::{diagnose, Endpoint, TrustPool, DEFAULT_TIMEOUT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: custom_trust_store <endpoint> <truststore.p12> <password>");
        std::process::exit(2);
    }

    let endpoint = Endpoint::parse(&args[1])?;
    let pool = TrustPool::load(Some(Path::new(&args[2])), &args[3])?;
    for anchor in pool.custom_anchors() {
        println!("Trusting {} ({})", anchor.common_name(), anchor.alias());
    }

    let result = diagnose(&endpoint, &pool, DEFAULT_TIMEOUT)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
