mod accounts;

pub use accounts::{accounts_operation, AccountsView, ACCOUNTS_QUERY};
