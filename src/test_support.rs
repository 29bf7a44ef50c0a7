//! Fixtures shared by unit tests.

use crate::account::AccountIdentity;
use crate::core_types::Address;
use crate::forge::SigningKey;
use crate::money::Money;
use crate::network::{NetworkProfile, Networks};
use std::sync::Arc;

pub const ODIN_MINTER: &str = "0x47d082a115c63e7b58b1532d20e631538eafadde";
pub const ODIN_CHECK: &str = "https://check.odin/graphql";
pub const HEIMDALL_CHECK: &str = "https://check.heimdall/graphql";

pub fn identity(id: usize) -> AccountIdentity {
    let mut addr = [0u8; 20];
    addr[19] = id as u8 + 1;
    AccountIdentity {
        id,
        name: format!("probe-{id}"),
        address: Address::from_bytes(addr),
        key: SigningKey::from_hex(&hex::encode([id as u8 + 1; 32])).expect("valid test key"),
    }
}

pub fn identities(n: usize) -> Vec<Arc<AccountIdentity>> {
    (0..n).map(|i| Arc::new(identity(i))).collect()
}

fn profile(check: &str, minters: Vec<Address>, fallback: i64, index: usize) -> NetworkProfile {
    NetworkProfile {
        ticker: "NCG".to_string(),
        decimal_places: 2,
        minters,
        checking_endpoint: check.to_string(),
        balance_endpoint: check.to_string(),
        fallback_balance: Some(Money::from_units(fallback)),
        planet_index: index,
        endpoints: Vec::new(),
    }
}

pub fn test_networks() -> Networks {
    let minter = ODIN_MINTER.parse().expect("valid minter");
    Networks {
        odin: profile(ODIN_CHECK, vec![minter], 14, 0),
        heimdall: profile(HEIMDALL_CHECK, Vec::new(), 23, 1),
    }
}
