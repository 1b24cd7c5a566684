//! Wire-level types shared with wallets and UI consumers.
//!
//! Each submodule mirrors one EIP:
//!
//! - [`eip6963`] - provider discovery announcements
//! - [`eip1559`] - fee estimates derived from `eth_feeHistory`
//! - [`eip2718`] - transaction requests for `eth_sendTransaction`
//! - [`eip712`] - typed data payloads for `eth_signTypedData_v4`

pub mod eip1559;
pub mod eip2718;
pub mod eip6963;
pub mod eip712;

pub use eip1559::{GasEstimates, PriorityFees};
pub use eip2718::EthereumTransaction;
pub use eip6963::{ProviderDetail, ProviderInfo};
pub use eip712::{TypedData, TypedDataDomain, TypedDataField};
