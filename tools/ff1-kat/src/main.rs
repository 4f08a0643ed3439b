//! Independent known-answer-test runner for the FF1 kernel, checked against
//! the NIST SP 800-38G Appendix test vectors rather than against the crate's
//! own unit tests — this only exercises `kmscrypt_core`'s public API, the way
//! the teacher's `verify-kat` checks `qsfs-core`'s wrap/KDF output against
//! fixture JSON without reaching into its internals.

use kmscrypt_core::ff1::Ff1;
use serde::Deserialize;

#[derive(Deserialize)]
struct Vector {
    name: String,
    radix: u32,
    key_hex: String,
    tweak_hex: String,
    plaintext: String,
    ciphertext: String,
}

fn alphabet_for_radix(radix: u32) -> anyhow::Result<Vec<char>> {
    const DIGITS: &str = "0123456789abcdefghijklmnopqrstuvwxyz";
    let radix = radix as usize;
    if radix < 2 || radix > DIGITS.len() {
        anyhow::bail!("radix {radix} not representable by the default 0-9a-z alphabet");
    }
    Ok(DIGITS.chars().take(radix).collect())
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).expect("usage: ff1-kat <vectors.json>");
    let data = std::fs::read_to_string(&path)?;
    let vectors: Vec<Vector> = serde_json::from_str(&data)?;

    let mut failures = 0;
    for v in &vectors {
        let key = hex::decode(&v.key_hex)?;
        let tweak = hex::decode(&v.tweak_hex)?;
        let alphabet = alphabet_for_radix(v.radix)?;
        let ff1 = Ff1::new(&key, tweak, alphabet)?;

        let got_ct = ff1.encrypt(&v.plaintext)?;
        if got_ct != v.ciphertext {
            eprintln!("FAIL {}: encrypt({}) = {got_ct}, want {}", v.name, v.plaintext, v.ciphertext);
            failures += 1;
            continue;
        }

        let got_pt = ff1.decrypt(&v.ciphertext)?;
        if got_pt != v.plaintext {
            eprintln!("FAIL {}: decrypt({}) = {got_pt}, want {}", v.name, v.ciphertext, v.plaintext);
            failures += 1;
            continue;
        }

        println!("OK   {}", v.name);
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} vectors failed", vectors.len());
    }
    println!("all {} vectors passed", vectors.len());
    Ok(())
}
