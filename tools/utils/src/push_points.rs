use std::time::{Duration, SystemTime};

use rand::Rng;
use structopt::StructOpt;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use udplink::base::unix_nanos;
use udplink::{FieldValue, Point};

#[derive(StructOpt, Debug)]
#[structopt(name = "push_points", about = "send synthetic line protocol to udplink")]
pub struct CommandLine {
    /// Address udplink listens on
    #[structopt(short = "a", default_value = "127.0.0.1:8089")]
    pub addr: String,
    /// Points packed into every datagram
    #[structopt(short = "p", default_value = "10")]
    pub points: usize,
    /// Datagrams to send, 0 sends forever
    #[structopt(short = "n", default_value = "0")]
    pub count: u64,
    /// Milliseconds between datagrams
    #[structopt(short = "i", default_value = "100")]
    pub interval: u64,
    /// Every n-th datagram is malformed, 0 disables
    #[structopt(short = "b", default_value = "0")]
    pub bad: u64,
}

#[tokio::main]
async fn main() {
    let commandline = CommandLine::from_args();
    let socket = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    socket.connect(&commandline.addr).await.unwrap();

    let mut idx: u64 = 0;
    while commandline.count == 0 || idx < commandline.count {
        idx += 1;
        let payload = if commandline.bad != 0 && idx % commandline.bad == 0 {
            "malformed line without fields".to_owned()
        } else {
            let mut rng = rand::thread_rng();
            let timestamp = unix_nanos(SystemTime::now());
            (0..commandline.points)
                .map(|i| {
                    Point::new("synthetic", timestamp + i as i64)
                        .tag("host", "push_points")
                        .tag("slot", i.to_string())
                        .field("sequence", FieldValue::Unsigned(idx))
                        .field("value", FieldValue::Float(rng.gen_range(0.0..100.0)))
                        .field("ok", FieldValue::Boolean(rng.gen_bool(0.9)))
                        .to_line()
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        println!("Sending datagram {idx}: {} bytes", payload.len());
        socket.send(payload.as_bytes()).await.unwrap();
        sleep(Duration::from_millis(commandline.interval)).await;
    }
}
