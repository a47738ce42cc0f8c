//! Key utilities for co-signers
//!
//! Usage:
//!   cosigned keygen [--mldsa]                              Generate a signer
//!   cosigned sign --seed <hex> --message <hex> [--mldsa]   Sign a message

use anyhow::{bail, Context, Result};

use cosigned::{Identity, Scheme, Signer};

fn scheme_from(args: &[String]) -> Scheme {
    if args.iter().any(|a| a == "--mldsa") {
        Scheme::MlDsa65
    } else {
        Scheme::Ed25519
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Generate a fresh signer and print its seed and identity
pub fn run_keygen(args: &[String]) {
    let signer = Signer::generate(scheme_from(args));

    println!("Seed (hex, keep secret):");
    println!("{}", signer.seed_hex());
    println!();
    println!("Identity:");
    println!("{}", Identity::from_signer(&signer));
}

/// Sign a hex message with a hex seed and print the signature
pub fn run_sign(args: &[String]) -> Result<()> {
    let Some(seed) = flag_value(args, "--seed") else {
        bail!("missing --seed <hex>");
    };
    let Some(message) = flag_value(args, "--message") else {
        bail!("missing --message <hex>");
    };

    let signer = Signer::from_seed_hex(scheme_from(args), seed).context("invalid seed")?;
    let message = hex::decode(message).context("message is not hex")?;
    let signature = signer.sign(&message).context("signing failed")?;

    println!("{}", hex::encode(signature));
    Ok(())
}
