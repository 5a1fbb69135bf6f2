use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Error};
use log::{error, info};
use structopt::StructOpt;
use tokio::{select, signal, time::interval};

use udplink::cli::CommandLine;
use udplink::{Catalog, HttpCatalog, HttpWriter, PointsWriter, Service, ServiceHandle};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let commandline: CommandLine = StructOpt::from_args();
    commandline.initialize_logging()?;
    let config = commandline.initialize_config()?;
    commandline.banner(&config);

    let writer: Arc<dyn PointsWriter> =
        Arc::new(HttpWriter::new(&config.destination.url, config.destination.timeout)?);
    let catalog: Arc<dyn Catalog> =
        Arc::new(HttpCatalog::new(&config.destination.url, config.destination.timeout)?);

    let mut services: Vec<(Arc<Service>, ServiceHandle)> = vec![];
    for udp in config.udp.iter().filter(|u| u.enabled) {
        let service = Arc::new(Service::new(udp.clone(), writer.clone(), catalog.clone()));
        let handle = match service.open().await {
            Ok(h) => h,
            Err(e) => {
                close_all(services).await;
                return Err(e).with_context(|| format!("UDP listener on {}", udp.bind_address));
            }
        };

        info!("UDP listener ready on {}", handle.addr());
        services.push((service, handle));
    }

    if services.is_empty() {
        anyhow::bail!("No enabled udp listener in config");
    }

    let tags = HashMap::new();
    let mut stats_interval = interval(config.stats_interval);
    loop {
        select! {
            _ = signal::ctrl_c() => break,
            _ = stats_interval.tick() => {
                for (service, _) in services.iter() {
                    for stat in service.statistics(&tags) {
                        let s = stat.values;
                        info!(
                            "{:>20}: points = {:<5} bytes = {:<8} parse_fail = {:<5} read_fail = {:<5} batches = {:<5} points_tx = {:<5} batches_fail = {}",
                            stat.tags.get("bind").map(String::as_str).unwrap_or_default(),
                            s.points_received,
                            s.bytes_received,
                            s.points_parse_fail,
                            s.read_fail,
                            s.batches_transmitted,
                            s.points_transmitted,
                            s.batches_transmit_fail,
                        );
                    }
                }
            }
        }
    }

    info!("Shutting down");
    close_all(services).await;
    Ok(())
}

async fn close_all(services: Vec<(Arc<Service>, ServiceHandle)>) {
    for (_, handle) in services {
        let addr = handle.addr();
        if let Err(e) = handle.close().await {
            error!("UDP listener on {addr} failed to stop. Error = {e}");
        }
    }
}
