//! The account link registry: configuration pairing an external aggregator
//! account with the internal tracking pocket it reconciles against.

mod core;
mod credential;

pub use core::{
    LinkedAccount, Provider, attach_pocket, create_link, create_linked_account_table, get_link,
    list_active_links, remove_link,
};
pub use credential::{
    create_provider_credential_table, credential_is_valid, invalidate_credential, store_credential,
};
