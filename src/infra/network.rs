use std::net::{Ipv4Addr, TcpListener};

use log::warn;
use rand::Rng;

use crate::domain::port::PortAllocator;

const FALLBACK_PORT_RANGE: std::ops::RangeInclusive<u16> = 10000..=60000;

/// Asks the OS for an ephemeral port by binding a throwaway loopback listener.
///
/// The listener is closed before the port is handed out, so another process may
/// grab it before the container engine binds it.
pub struct LoopbackPortAllocator;

impl PortAllocator for LoopbackPortAllocator {
    fn allocate(&self) -> u16 {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).and_then(|listener| listener.local_addr())
        {
            Ok(address) => address.port(),
            Err(e) => {
                warn!("Failed to get available port, using random: {}", e);
                rand::thread_rng().gen_range(FALLBACK_PORT_RANGE)
            }
        }
    }
}
