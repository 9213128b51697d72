//! Contract facade and ABI codec

pub mod abi;
pub mod facade;

pub use abi::{AbiError, ContractInterface, Function, ParamType, Token};
pub use facade::{CallOutput, ContractFacade, ContractHandle, Receipt};
