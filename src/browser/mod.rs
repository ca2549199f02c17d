//! Browser side: the capability interface page agents consume, and its
//! implementation over the Chrome DevTools Protocol.

pub mod capability;
pub mod cdp;
pub mod launcher;
pub mod page;

pub use capability::{ElementHandle, Locator, PageCapabilities, UploadFile};
pub use cdp::{CdpClient, CdpEvent};
pub use page::CdpPage;
