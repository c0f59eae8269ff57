//! Two users exchanging messages through one in-memory context.

use anyhow::Context;
use sc4_ratchet::{logging, ProtocolConfig, ProtocolContext};

fn main() -> anyhow::Result<()> {
    logging::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path))?;
            ProtocolConfig::from_json(&json)?
        }
        None => ProtocolConfig::default(),
    };
    let ctx = ProtocolContext::new(config)?;

    let alice = ctx.create_user("Alice");
    let mut bob = ctx.create_user("Bob");

    let bundle = ctx.key_bundle(&bob);
    let (mut alice_session, packet) =
        ctx.start_session(&alice, &bundle, Some(&b"Hello Bob"[..]))?;
    let (mut bob_session, first) = ctx.accept_session(&mut bob, &packet)?;
    if let Some(first) = first {
        println!("Bob received: {}", String::from_utf8_lossy(&first));
    }

    for i in 0..5 {
        let packet = ctx.encrypt(&mut alice_session, format!("Hello Bob {}", i).as_bytes())?;
        let text = ctx.decrypt(&mut bob_session, &packet)?;
        println!("Bob received: {}", String::from_utf8_lossy(&text));

        let packet = ctx.encrypt(&mut bob_session, format!("Hello Alice {}", i).as_bytes())?;
        let text = ctx.decrypt(&mut alice_session, &packet)?;
        println!("Alice received: {}", String::from_utf8_lossy(&text));
    }

    tracing::info!(
        sent = alice_session.messages_sent(),
        received = alice_session.messages_received(),
        "Conversation finished"
    );
    Ok(())
}
