//! Diagnose a single endpoint against the platform trust roots.
//!
//! Run with: cargo run --example diagnose_endpoint -- expired.badssl.com

use ssl_inspector::{diagnose, Endpoint, TrustPool, DEFAULT_TIMEOUT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "badssl.com".to_string());

    let endpoint = Endpoint::parse(&raw)?;
    println!("Inspecting {}", endpoint);

    let result = diagnose(&endpoint, &TrustPool::platform(), DEFAULT_TIMEOUT)?;
    if result.valid {
        println!("Certificate accepted");
        if let Some(protocol) = &result.protocol {
            println!("Protocol: {}", protocol);
        }
    } else {
        for (i, message) in result.messages.iter().enumerate() {
            println!(" [{}] - {}", i + 1, message);
        }
    }

    Ok(())
}
