mod account;
mod ops;

pub use account::{
    Account, AccountKey, KiroAuthMethod, Provider, ProviderDetail, SharingPreference, User,
};
pub use ops::AccountStore;
