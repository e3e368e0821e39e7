//! Controller binary.
//!
//! Waits for every mote in the simulation to report its bandwidth demand,
//! its radio neighbors and its routing parent, then computes a slotframe
//! schedule with the greedy first-fit assigner and installs it on the motes
//! over the acknowledged UDP protocol. The process exits once the schedule
//! is confirmed everywhere; installing it once is the whole job.

use std::{env, process, time::Duration};

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use sixsched::{Config, Controller};

fn print_help() {
    eprintln!("sixsched [#MOTES] [FIRST_MOTE_ID] [PORT] [ACK_TIMEOUT_SECS]");
    eprintln!("   - #MOTES the number of motes in the simulation including the border router");
    eprintln!("   - FIRST_MOTE_ID the id of the first mote, which is the border router");
    eprintln!("   - PORT the controller port");
    eprintln!("   - ACK_TIMEOUT_SECS how long to wait for an ack before retransmitting");
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let [n_nodes, first_node_id, port, timeout] = &args[..] else {
        return Err("wrong command line usage".into());
    };

    let n_nodes: u16 = n_nodes
        .parse()
        .map_err(|_| format!("invalid mote count {n_nodes:?}"))?;
    let first_node_id: u16 = first_node_id
        .parse()
        .map_err(|_| format!("invalid first mote id {first_node_id:?}"))?;
    let port: u16 = port.parse().map_err(|_| format!("invalid port {port:?}"))?;
    let timeout: u64 = timeout
        .parse()
        .map_err(|_| format!("invalid ack timeout {timeout:?}"))?;

    Ok(Config::new(
        n_nodes,
        first_node_id,
        port,
        Duration::from_secs(timeout),
    ))
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            process::exit(1);
        }
    };

    match Controller::new(config).run().await {
        Ok(report) => match report.write_to_file("stats-") {
            Ok(path) => info!(path = %path.display(), "run statistics written"),
            Err(e) => {
                error!(error = %e, "failed to write the statistics file");
                process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "controller run failed");
            process::exit(1);
        }
    }
}
