//! Structured query: fetch a fixed set of known fields

use crate::core::client::{Client, Reply, RpcError};
use crate::core::discovery::DiscoveredDevice;
use crate::core::protocol::fields::{self, FieldError, DATA_OFFSET, FIRMWARE_OFFSET, NAME_LEN, SERIAL_OFFSET};
use crate::core::protocol::{FirmwareVersion, Request};
use crate::core::record::{DeviceInfo, DeviceRecord, RecordDetails};
use thiserror::Error;
use tracing::{debug, info};

/// Query failure; the device gets no record
#[derive(Error, Debug)]
pub enum QueryError {
    /// The request failed
    #[error("{} request failed: {source}", .request.name())]
    Request {
        /// Request that failed
        request: Request,
        /// Underlying error
        #[source]
        source: RpcError,
    },

    /// The reply did not hold the expected field
    #[error("{} reply malformed: {source}", .request.name())]
    Malformed {
        /// Request whose reply was malformed
        request: Request,
        /// Field error
        #[source]
        source: FieldError,
    },
}

async fn fetch(client: &Client, device: &DiscoveredDevice, request: Request) -> Result<Reply, QueryError> {
    let reply = client
        .request(device.source, request.id(), &[], Some(&device.device_id), None)
        .await
        .map_err(|source| QueryError::Request { request, source })?;
    debug!(device = %device.device_id, request = request.name(), "Field fetched");
    Ok(reply)
}

fn parse<T>(request: Request, parsed: Result<T, FieldError>) -> Result<T, QueryError> {
    parsed.map_err(|source| QueryError::Malformed { request, source })
}

/// Fetch name, address, netmask, gateway, firmware and serial, in that order
///
/// No local timeout: each request waits until answered, so the caller
/// bounds the whole query. The first failure aborts it.
pub async fn query_device(client: &Client, device: &DiscoveredDevice) -> Result<DeviceRecord, QueryError> {
    let reply = fetch(client, device, Request::DeviceName).await?;
    let name = parse(Request::DeviceName, fields::ascii(&reply.body, DATA_OFFSET, NAME_LEN))?;

    let reply = fetch(client, device, Request::Address).await?;
    let ip = parse(Request::Address, fields::ipv4(&reply.body, DATA_OFFSET))?;

    let reply = fetch(client, device, Request::Netmask).await?;
    let netmask = parse(Request::Netmask, fields::ipv4(&reply.body, DATA_OFFSET))?;

    let reply = fetch(client, device, Request::Gateway).await?;
    let gateway = parse(Request::Gateway, fields::ipv4(&reply.body, DATA_OFFSET))?;

    let reply = fetch(client, device, Request::Firmware).await?;
    let firmware = parse(Request::Firmware, fields::u32_le(&reply.body, FIRMWARE_OFFSET))?;
    let serial = parse(Request::Firmware, fields::u16_le(&reply.body, SERIAL_OFFSET))?;

    let info = DeviceInfo {
        name,
        ip,
        netmask,
        gateway,
        firmware: FirmwareVersion(firmware),
        serial,
    };
    info!(device = %device.device_id, name = %info.name, firmware = %info.firmware, "Query finished");

    Ok(DeviceRecord::new(device, RecordDetails::Query(info)))
}
