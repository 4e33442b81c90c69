//! Locating and driving the external Android build tools: the versioned
//! `build-tools` (zipalign, apksigner), the cached JDK, and the apktool jar.

pub mod android;
pub mod exec;
pub mod hashing;
pub mod locator;

pub use android::{SigningKey, ToolError};
pub use exec::{ToolCommand, ToolFailure, ToolLine, ToolOutput};
pub use locator::{HostPlatform, ToolLocator};
