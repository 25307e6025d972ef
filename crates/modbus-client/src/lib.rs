use std::cmp::min;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "mock"))]
mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;

/// Register-level access to one field-bus device.
///
/// Calls take `&mut self`: a serial line carries one request at a time, so a
/// transport is never shared between concurrent callers.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), ClientError>;

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError>;

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ClientError>;

    fn disconnect(&mut self);

    /// Human readable endpoint, e.g. `Serial /dev/ttyUSB0`.
    fn describe(&self) -> String;
}

/// Physical link to the inverter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// Modbus RTU, 8N1, on a local serial port.
    Rtu { port: String, baud_rate: u32 },
    /// Modbus TCP, e.g. an RS485 gateway.
    Tcp { host: String, port: u16 },
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Rtu { port, .. } => write!(f, "Serial {port}"),
            Link::Tcp { host, port } => write!(f, "TCP {host}:{port}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub link: Link,
    pub slave: u8,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Number of retries per request after the initial attempt.
    pub retry_count: usize,
    /// Base delay between retries in milliseconds (exponential backoff).
    pub retry_backoff_ms: u64,
    /// Upper bound for retry backoff delay in milliseconds.
    pub retry_max_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            link: Link::Rtu {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 9_600,
            },
            slave: 1,
            timeout_ms: 1_000,
            retry_count: 1,
            retry_backoff_ms: 100,
            retry_max_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("modbus transport error: {0}")]
    Modbus(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no response for register {address}")]
    NoResponse { address: u16 },
    #[error("expected {expected} registers, got {got}")]
    ShortResponse { expected: u16, got: usize },
    #[error("not connected")]
    NotConnected,
}

enum Request<'a> {
    Read { address: u16, count: u16 },
    Write { address: u16, values: &'a [u16] },
}

impl Request<'_> {
    fn address(&self) -> u16 {
        match self {
            Request::Read { address, .. } | Request::Write { address, .. } => *address,
        }
    }
}

#[derive(Debug)]
pub struct ModbusClient {
    config: ClientConfig,
    context: Option<Context>,
}

impl ModbusClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Takes the config by value: the client is not borrowed across the connect await.
    async fn open(config: ClientConfig) -> Result<Context, ClientError> {
        let slave = Slave(config.slave);
        let timeout_ms = config.timeout_ms;
        match config.link {
            Link::Rtu { port, baud_rate } => {
                let builder = tokio_serial::new(port, baud_rate)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .timeout(Duration::from_millis(timeout_ms));
                let serial = SerialStream::open(&builder)?;
                Ok(rtu::attach_slave(serial, slave))
            }
            Link::Tcp { host, port } => {
                let addr = format!("{host}:{port}")
                    .parse::<SocketAddr>()
                    .map_err(|_| ClientError::InvalidAddress(host, port))?;
                match timeout(Duration::from_millis(timeout_ms), tcp::connect_slave(addr, slave)).await {
                    Ok(result) => Ok(result?),
                    Err(_) => Err(ClientError::Timeout { timeout_ms }),
                }
            }
        }
    }

    async fn execute(&mut self, request: Request<'_>) -> Result<Vec<u16>, ClientError> {
        if self.context.is_none() {
            self.connect().await?;
        }
        let timeout_ms = self.config.timeout_ms;
        let slave = self.config.slave;
        let address = request.address();
        let mut attempts = 0usize;

        loop {
            let delay_ms = self.retry_delay_ms(attempts);
            let ctx = self.context.as_mut().ok_or(ClientError::NotConnected)?;
            ctx.set_slave(Slave(slave));
            let result = match &request {
                Request::Read { address, count } => {
                    timeout(
                        Duration::from_millis(timeout_ms),
                        ctx.read_input_registers(*address, *count),
                    )
                    .await
                }
                Request::Write { address, values } => timeout(
                    Duration::from_millis(timeout_ms),
                    ctx.write_multiple_registers(*address, *values),
                )
                .await
                .map(|result| result.map(|()| Vec::new())),
            };

            let last_error = match result {
                Ok(Ok(values)) => {
                    debug!(slave, address, "modbus request ok");
                    return Ok(values);
                }
                Ok(Err(err)) => {
                    warn!(slave, address, error = %err, "modbus request error");
                    ClientError::Modbus(err)
                }
                Err(_) => {
                    warn!(slave, address, "modbus request timeout");
                    ClientError::Timeout { timeout_ms }
                }
            };

            if attempts >= self.config.retry_count {
                return Err(last_error);
            }
            attempts += 1;
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    fn retry_delay_ms(&self, attempt: usize) -> u64 {
        let base = self.config.retry_backoff_ms.max(1);
        let shift = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        let max = self.config.retry_max_backoff_ms.max(base);
        min(delay, max)
    }
}

#[async_trait]
impl Transport for ModbusClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        if self.context.is_some() {
            return Ok(());
        }
        let context = Self::open(self.config.clone()).await?;
        info!(link = %self.config.link, slave = self.config.slave, "modbus link open");
        self.context = Some(context);
        Ok(())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let values = self.execute(Request::Read { address, count }).await?;
        if values.len() < usize::from(count) {
            return Err(ClientError::ShortResponse {
                expected: count,
                got: values.len(),
            });
        }
        Ok(values)
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ClientError> {
        self.execute(Request::Write { address, values }).await?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.context.take().is_some() {
            info!(link = %self.config.link, "modbus link closed");
        }
    }

    fn describe(&self) -> String {
        self.config.link.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let client = ModbusClient::new(ClientConfig {
            retry_backoff_ms: 100,
            retry_max_backoff_ms: 300,
            ..ClientConfig::default()
        });
        assert_eq!(client.retry_delay_ms(0), 100);
        assert_eq!(client.retry_delay_ms(1), 200);
        assert_eq!(client.retry_delay_ms(2), 300);
        assert_eq!(client.retry_delay_ms(64), 300);
    }

    #[tokio::test]
    async fn connect_runs_on_a_spawned_task() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let mut client = ModbusClient::new(ClientConfig {
            link: Link::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            ..ClientConfig::default()
        });

        let handle = tokio::spawn(async move {
            let result = client.connect().await;
            (client, result)
        });
        let (client, result) = handle.await.expect("join");
        result.expect("connect");
        assert!(client.context.is_some());
        assert_eq!(client.describe(), format!("TCP 127.0.0.1:{port}"));
        drop(listener);
    }

    #[tokio::test]
    async fn unparsable_tcp_host_is_rejected() {
        let mut client = ModbusClient::new(ClientConfig {
            link: Link::Tcp {
                host: "not a host".to_string(),
                port: 502,
            },
            ..ClientConfig::default()
        });
        assert!(matches!(
            client.connect().await,
            Err(ClientError::InvalidAddress(_, 502))
        ));
    }

    #[test]
    fn link_describes_endpoint() {
        let link = Link::Rtu {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9_600,
        };
        assert_eq!(link.to_string(), "Serial /dev/ttyUSB0");
    }
}
