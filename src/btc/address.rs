//! Bitcoin address shapes: bech32/bech32m segwit and base58check legacy

use bech32::{FromBase32, Variant};

/// Base58 version bytes of P2PKH and P2SH addresses
const MAINNET_VERSIONS: [u8; 2] = [0x00, 0x05];
const TESTNET_VERSIONS: [u8; 2] = [0x6f, 0xc4];

const MAINNET_HRP: &str = "bc";
const TESTNET_HRP: &str = "tb";

/// Valid address of the given network
pub fn is_valid_address(address: &str, testnet: bool) -> bool {
    if address.is_empty() {
        return false;
    }
    let hrp = if testnet { TESTNET_HRP } else { MAINNET_HRP };
    let has_hrp = address
        .get(..hrp.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(hrp));
    if has_hrp {
        return is_valid_segwit(address, hrp);
    }
    let versions = if testnet { TESTNET_VERSIONS } else { MAINNET_VERSIONS };
    is_valid_base58(address, &versions)
}

fn is_valid_segwit(address: &str, want_hrp: &str) -> bool {
    let Ok((hrp, data, variant)) = bech32::decode(address) else {
        return false;
    };
    if hrp != want_hrp {
        return false;
    }
    let Some((version, program)) = data.split_first() else {
        return false;
    };
    let version = version.to_u8();
    if version > 16 {
        return false;
    }
    let Ok(program) = Vec::<u8>::from_base32(program) else {
        return false;
    };
    match version {
        0 => variant == Variant::Bech32 && (program.len() == 20 || program.len() == 32),
        _ => variant == Variant::Bech32m && (2..=40).contains(&program.len()),
    }
}

fn is_valid_base58(address: &str, versions: &[u8]) -> bool {
    match bs58::decode(address).with_check(None).into_vec() {
        Ok(payload) => payload.len() == 21 && versions.contains(&payload[0]),
        Err(_) => false,
    }
}
