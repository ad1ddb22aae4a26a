// Re-export the directory seam from the submodules
mod client;
pub mod directory_object;
mod ldap3_client;
pub mod queries;

pub use client::{LdapClient, LdapConnectionOptions, NamingContext, ObjectStream};
pub use directory_object::{dn_to_domain, DirectoryObject};
pub use ldap3_client::Ldap3Client;
pub use queries::{config_nc_data, default_nc_data, LdapQueryData};
