use crate::domain::model::PortInfo;
use crate::domain::ports::{LinkSettings, SerialBackend, SerialLink};
use crate::utils::error::{RelayError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};

/// Serial backend over the host's real serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSerialBackend;

impl SerialBackend for NativeSerialBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(|e| RelayError::EnumerationError {
            message: e.to_string(),
        })?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    path: p.port_name,
                    manufacturer: usb.manufacturer,
                    vendor_id: Some(format!("{:04x}", usb.vid)),
                    product_id: Some(format!("{:04x}", usb.pid)),
                },
                _ => PortInfo {
                    path: p.port_name,
                    manufacturer: None,
                    vendor_id: None,
                    product_id: None,
                },
            })
            .collect())
    }

    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| RelayError::OpenError {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Opened {} ({} baud, 8N1, read timeout {:?})",
            path,
            settings.baud_rate,
            settings.read_timeout
        );
        Ok(Box::new(NativeLink { port }))
    }
}

struct NativeLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for NativeLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn reader(&mut self) -> io::Result<Box<dyn io::Read + Send>> {
        let clone = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(PortReader(clone)))
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        let flushed = self.port.flush();
        // 釋放 port 即關閉底層檔案描述符
        drop(self);
        flushed
    }
}

struct PortReader(Box<dyn SerialPort>);

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}
