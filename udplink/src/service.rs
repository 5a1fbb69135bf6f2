use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use flume::bounded;
use log::{error, info, warn};
use tokio::net::lookup_host;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::base::batcher::PointBatcher;
use crate::base::delivery::Delivery;
use crate::base::stats::{Statistic, Statistics, StatisticsSnapshot};
use crate::base::writer::{Catalog, PointsWriter};
use crate::collector::parser::Parser;
use crate::collector::udp::{self, Listener};
use crate::config::{self, Config};

/// Arbitrary, datagrams rarely queue up beyond a handful
const RELAY_CHANNEL_LEN: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error {0}")]
    Config(#[from] config::Error),
    #[error("Failed to resolve UDP address {addr}. Error = {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Listener error {0}")]
    Listener(#[from] udp::Error),
    #[error("Service was already started")]
    AlreadyStarted,
    #[error("Service task failed. Error = {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unstarted,
    Starting,
    Running,
    Stopping,
    /// Terminal, a stopped service can't be started again
    Stopped,
}

/// UDP service that listens for line protocol datagrams and writes the points in
/// batches to a database.
///
/// ```text
/// socket ─► Listener ─► relay ─► Parser ─► PointBatcher ─► Delivery ─► PointsWriter
/// ```
pub struct Service {
    config: Arc<Config>,
    writer: Arc<dyn PointsWriter>,
    catalog: Arc<dyn Catalog>,
    stats: Arc<Statistics>,
    default_tags: BTreeMap<String, String>,
    state: watch::Sender<State>,
}

impl Service {
    pub fn new(config: Config, writer: Arc<dyn PointsWriter>, catalog: Arc<dyn Catalog>) -> Service {
        let config = config.with_defaults();
        let default_tags = BTreeMap::from([("bind".to_owned(), config.bind_address.clone())]);
        let (state, _) = watch::channel(State::Unstarted);

        Service {
            config: Arc::new(config),
            writer,
            catalog,
            stats: Arc::new(Statistics::new()),
            default_tags,
            state,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Statistics for periodic monitoring, tagged with `bind` and `tags`
    pub fn statistics(&self, tags: &HashMap<String, String>) -> Vec<Statistic> {
        let mut merged = self.default_tags.clone();
        merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        vec![Statistic { name: "udp", tags: merged, values: self.stats.snapshot() }]
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Runs the service until `cancel` is triggered. A write already in flight is not
    /// interrupted, so stopping can take up to one write (bounded by the writer's timeout).
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        self.run_with_ready(cancel, None).await
    }

    /// Runs the service until `cancel` is triggered. Once the socket is bound and every
    /// stage is running, the bound address is sent on `ready`.
    ///
    /// If a stage exits on its own the other stages are stopped too. `cancel` itself is
    /// left alone, other services sharing it keep running.
    pub async fn run_with_ready(
        &self,
        cancel: CancellationToken,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), Error> {
        let cancel = cancel.child_token();
        let started = self.state.send_if_modified(|state| match state {
            State::Unstarted => {
                *state = State::Starting;
                true
            }
            _ => false,
        });
        if !started {
            return Err(Error::AlreadyStarted);
        }

        let (socket, addr) = match self.setup().await {
            Ok(v) => v,
            Err(e) => {
                self.state.send_replace(State::Stopped);
                return Err(e);
            }
        };

        let mut batcher = PointBatcher::new(
            self.config.batch_size,
            self.config.batch_pending,
            self.config.batch_timeout,
        );
        batcher.start();

        info!("Started listening on UDP: {addr}");

        let (relay_tx, relay_rx) = bounded(RELAY_CHANNEL_LEN);
        let listener = Listener::new(socket, relay_tx, self.stats.clone());
        let parser =
            Parser::new(self.config.precision, relay_rx, batcher.input(), self.stats.clone());
        let delivery = Delivery::new(
            self.config.clone(),
            batcher.output(),
            self.writer.clone(),
            self.catalog.clone(),
            self.stats.clone(),
        );

        let mut stages = JoinSet::new();
        stages.spawn(listener.start(cancel.clone()));
        stages.spawn(parser.start(cancel.clone()));
        stages.spawn(delivery.start(cancel.clone()));

        self.state.send_replace(State::Running);
        if let Some(ready) = ready {
            // Caller not waiting anymore is fine
            let _ = ready.send(addr);
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = stages.join_next() => {
                warn!("UDP stage exited before shutdown, stopping service");
                cancel.cancel();
            }
        }

        self.state.send_replace(State::Stopping);
        while let Some(r) = stages.join_next().await {
            if let Err(e) = r {
                error!("UDP stage failed. Error = {e:?}");
            }
        }
        batcher.stop().await;

        self.state.send_replace(State::Stopped);
        info!("Service closed: {addr}");
        Ok(())
    }

    async fn setup(&self) -> Result<(tokio::net::UdpSocket, SocketAddr), Error> {
        self.config.validate()?;

        let bind_address = self.config.resolvable_address();
        let addr = lookup_host(&bind_address)
            .await
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
                })
            })
            .map_err(|source| {
                info!("Failed to resolve UDP address {bind_address}. Error = {source}");
                Error::Resolve { addr: bind_address.clone(), source }
            })?;

        let socket = udp::bind(addr, self.config.read_buffer).map_err(|e| {
            info!("{e}");
            e
        })?;
        let local_addr = socket.local_addr().map_err(|source| udp::Error::Bind { addr, source })?;

        Ok((socket, local_addr))
    }

    /// Starts the service in the background and waits for it to be ready
    pub async fn open(self: &Arc<Self>) -> Result<ServiceHandle, Error> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let service = self.clone();
        let token = cancel.clone();
        let task =
            tokio::spawn(async move { service.run_with_ready(token, Some(ready_tx)).await });

        match ready_rx.await {
            Ok(addr) => Ok(ServiceHandle { addr, cancel, task }),
            // Ready is only dropped unsent when startup fails
            Err(_) => match task.await? {
                Err(e) => Err(e),
                Ok(()) => Err(Error::AlreadyStarted),
            },
        }
    }
}

/// A running service started with [`Service::open`]
pub struct ServiceHandle {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), Error>>,
}

impl ServiceHandle {
    /// Address the listener is bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the service and waits for every stage to exit, including a write in flight
    pub async fn close(self) -> Result<(), Error> {
        self.cancel.cancel();
        self.task.await?
    }
}
