//! Network, archive and file I/O

pub mod catalog;
pub mod auth;
pub mod transfer;
pub mod hub;
pub mod archive;
pub mod swath;
pub mod geotiff;
pub mod boundary;

pub use catalog::{CatalogConfig, CatalogResolver, TimePadding};
pub use auth::{Authenticator, ClientCredentials, PasswordGrant, StaticToken};
pub use transfer::{TransferClient, TransferOptions};
pub use hub::{HubClient, ProcessRequest};
pub use archive::{extract, list_product_dirs, ArchiveFormat};
pub use swath::{read_product_dir, SwathLayout, VariableRef};
pub use geotiff::{read_band, read_raster, write_bands, write_raster};
pub use boundary::read_boundary;
