//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{RawAdvertisement, ServiceData};
use crate::mac_address::MacAddress;
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use log::{debug, info};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// 10 ms in 0.625 ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Max HCI event size
const EVENT_BUFFER_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters of LE Set Scan Parameters, in wire order.
fn scan_parameters(active: bool) -> [u8; 7] {
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        if active { LE_SCAN_ACTIVE } else { LE_SCAN_PASSIVE },
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    /// Open a non-blocking raw socket bound to `dev_id`.
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(socket)
    }

    /// Only deliver LE meta events.
    fn filter_le_meta_events(&self) -> Result<(), ScanError> {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                &filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }

    /// Set scan parameters and enable scanning without duplicate filtering.
    fn enable_le_scan(&self, active: bool) -> Result<(), ScanError> {
        self.send_command(OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters(active))?;
        self.send_command(OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
    }
}

/// Parse an HCI event packet. Returns every advertising report it carries.
///
/// Reports are laid out one after another: event type, address type,
/// address (little-endian), data length, AD structures, RSSI.
fn parse_advertising_event(packet: &[u8]) -> Vec<RawAdvertisement> {
    let mut advertisements = Vec::new();
    if packet.len() < 5
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return advertisements;
    }

    let num_reports = usize::from(packet[4]);
    let mut rest = &packet[5..];
    for _ in 0..num_reports {
        // event type + address type + address + data length
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse();

        let data_len = usize::from(rest[8]);
        let Some(ad_data) = rest.get(9..9 + data_len) else {
            break;
        };
        let Some(&rssi) = rest.get(9 + data_len) else {
            break;
        };

        let mut advertisement = RawAdvertisement {
            address: MacAddress(addr),
            rssi: i16::from(rssi as i8),
            ..Default::default()
        };
        parse_ad_structures(ad_data, &mut advertisement);
        advertisements.push(advertisement);

        rest = &rest[10 + data_len..];
    }

    advertisements
}

/// Collect manufacturer data (company id kept) and 16-bit service data.
fn parse_ad_structures(ad_data: &[u8], advertisement: &mut RawAdvertisement) {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let body = &ad_data[offset + 2..offset + 1 + len];
        match ad_type {
            // first manufacturer block wins
            AD_TYPE_MANUFACTURER_DATA
                if body.len() >= 2 && advertisement.manufacturer_data.is_empty() =>
            {
                advertisement.manufacturer_data = body.to_vec();
            }
            AD_TYPE_SERVICE_DATA_16 if body.len() >= 2 => {
                let uuid = u16::from_le_bytes([body[0], body[1]]);
                advertisement
                    .service_data
                    .push(ServiceData::new(uuid, &body[2..]));
            }
            _ => {}
        }

        offset += 1 + len;
    }
}

/// Start scanning on hci0.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(active: bool) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let events = HciSocket::open(HCI_DEV)?;
    events.filter_le_meta_events()?;

    // Commands go through a separate socket bound to the same device
    let commands = HciSocket::open(HCI_DEV)?;
    commands.enable_le_scan(active)?;
    info!(
        "scanning on hci{HCI_DEV} via raw HCI ({})",
        if active { "active" } else { "passive" }
    );

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; EVENT_BUFFER_SIZE];

        'outer: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(_) => break,
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        debug!("HCI read failed: {e}");
                        break 'outer;
                    }
                    Err(_would_block) => break,
                };

                for advertisement in parse_advertising_event(&buf[..n]) {
                    if tx.send(advertisement).await.is_err() {
                        break 'outer;
                    }
                }
            }
        }
        debug!("HCI scan stopped");
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(addr: [u8; 6], ad_data: &[u8], rssi: i8) -> Vec<u8> {
        let mut out = vec![0x00, 0x00];
        let mut le_addr = addr;
        le_addr.reverse();
        out.extend_from_slice(&le_addr);
        out.push(ad_data.len() as u8);
        out.extend_from_slice(ad_data);
        out.push(rssi as u8);
        out
    }

    fn event(reports: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = reports.concat();
        let mut out = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (body.len() + 2) as u8,
            EVT_LE_ADVERTISING_REPORT,
            reports.len() as u8,
        ];
        out.extend(body);
        out
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
        assert_eq!(packet, [0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_parameters() {
        assert_eq!(scan_parameters(false), [0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(scan_parameters(true)[0], LE_SCAN_ACTIVE);
    }

    #[test]
    fn test_parse_service_data_report() {
        let addr = [0xA4, 0xC1, 0x38, 0x01, 0x02, 0x03];
        // flags, then service data 0x181A with a 3-byte body
        let ad = [0x02, 0x01, 0x06, 0x06, 0x16, 0x1A, 0x18, 0xAA, 0xBB, 0xCC];
        let parsed = parse_advertising_event(&event(&[report(addr, &ad, -70)]));

        assert_eq!(parsed.len(), 1);
        let adv = &parsed[0];
        assert_eq!(adv.address, MacAddress(addr));
        assert_eq!(adv.rssi, -70);
        assert!(adv.manufacturer_data.is_empty());
        assert_eq!(adv.service_data, [ServiceData::new(0x181A, [0xAA, 0xBB, 0xCC])]);
    }

    #[test]
    fn test_parse_manufacturer_data_keeps_company_id() {
        let addr = [0x00, 0x0B, 0x57, 0x11, 0x22, 0x33];
        let ad = [0x05, 0xFF, 0x90, 0x82, 0x01, 0x02];
        let parsed = parse_advertising_event(&event(&[report(addr, &ad, -55)]));

        assert_eq!(parsed[0].manufacturer_data, [0x90, 0x82, 0x01, 0x02]);
        assert!(parsed[0].service_data.is_empty());
    }

    #[test]
    fn test_parse_multiple_reports() {
        let a = report([1, 2, 3, 4, 5, 6], &[0x03, 0xFF, 0x01, 0x02], -40);
        let b = report([6, 5, 4, 3, 2, 1], &[], -90);
        let parsed = parse_advertising_event(&event(&[a, b]));

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].address, MacAddress([6, 5, 4, 3, 2, 1]));
        assert_eq!(parsed[1].rssi, -90);
    }

    #[test]
    fn test_parse_truncated_or_foreign_events() {
        let full = event(&[report([1, 2, 3, 4, 5, 6], &[0x03, 0xFF, 0x01, 0x02], -40)]);
        assert!(parse_advertising_event(&full[..full.len() - 1]).is_empty());
        assert!(parse_advertising_event(&[HCI_EVENT_PKT, 0x0E, 0x04, 0x01]).is_empty());

        let mut other_subevent = full.clone();
        other_subevent[3] = 0x01;
        assert!(parse_advertising_event(&other_subevent).is_empty());
    }

    #[test]
    fn test_malformed_ad_structure_stops_parsing() {
        let mut adv = RawAdvertisement::default();
        // second structure claims more bytes than remain
        parse_ad_structures(&[0x03, 0xFF, 0x01, 0x02, 0x09, 0x16, 0x1A], &mut adv);
        assert_eq!(adv.manufacturer_data, [0x01, 0x02]);
        assert!(adv.service_data.is_empty());
    }
}
