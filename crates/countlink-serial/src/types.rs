//! Port description types shared by all hosts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Criteria used when asking the host for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFilter {
    /// USB vendor identifier the port must report.
    pub vendor_id: u16,
}

impl PortFilter {
    /// Create a filter matching one USB vendor.
    pub fn vendor(vendor_id: u16) -> Self {
        Self { vendor_id }
    }

    /// Check if a port description satisfies the filter.
    pub fn matches(&self, info: &PortInfo) -> bool {
        info.vendor_id == Some(self.vendor_id)
    }
}

/// Description of a serial port as reported by the host.
///
/// # Examples
///
/// ```
/// use countlink_serial::{PortFilter, PortInfo};
///
/// let info = PortInfo::new("/dev/ttyACM0").with_usb_ids(0x2E8A, 0x000A);
/// assert!(PortFilter::vendor(0x2E8A).matches(&info));
/// assert!(!PortFilter::vendor(0x0403).matches(&info));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Host-specific port name (device path, COM name, mock label).
    pub name: String,

    /// USB vendor identifier, if the port is USB backed.
    pub vendor_id: Option<u16>,

    /// USB product identifier, if the port is USB backed.
    pub product_id: Option<u16>,

    /// USB serial number string, if reported.
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Create a description with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor_id: None,
            product_id: None,
            serial_number: None,
        }
    }

    /// Set the USB vendor and product identifiers.
    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }

    /// Set the USB serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => write!(f, "{} ({vid:04x}:{pid:04x})", self.name),
            _ => f.write_str(&self.name),
        }
    }
}
