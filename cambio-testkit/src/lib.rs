//! Test helpers shared by the Cambio test suites.

#![warn(clippy::all)]

mod helpers;

pub use helpers::{
    btc_to_xmr, quoted_record, sample_address, unique_deposit_address, with_deposit,
};
