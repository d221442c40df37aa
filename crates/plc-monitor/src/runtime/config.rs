use monitor_core::{DeviceConfig, EngineConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub plc_addr: Option<String>,
    pub unit_id: u8,
    pub poll_interval_ms: u64,
    pub io_timeout_ms: u64,
    pub start_running: bool,
    pub seed: Option<u64>,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub bridge_enabled: bool,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
    /// Problems found while parsing, reported once logging is up.
    pub warnings: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            plc_addr: None,
            unit_id: 1,
            poll_interval_ms: 500,
            io_timeout_ms: 200,
            start_running: false,
            seed: None,
            run_seconds: None,
            bind_addr: "127.0.0.1:7000".to_string(),
            bridge_enabled: true,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
            warnings: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--plc" => {
                    if let Some(value) = cfg.take_value(args, &mut i) {
                        cfg.plc_addr = Some(value);
                    }
                }
                "--unit-id" => {
                    if let Some(value) = cfg.take_parsed(args, &mut i) {
                        cfg.unit_id = value;
                    }
                }
                "--poll-interval-ms" => {
                    if let Some(value) = cfg.take_parsed(args, &mut i) {
                        cfg.poll_interval_ms = value;
                    }
                }
                "--io-timeout-ms" => {
                    if let Some(value) = cfg.take_parsed(args, &mut i) {
                        cfg.io_timeout_ms = value;
                    }
                }
                "--start-running" => {
                    cfg.start_running = true;
                }
                "--seed" => {
                    if let Some(value) = cfg.take_parsed(args, &mut i) {
                        cfg.seed = Some(value);
                    }
                }
                "--run-seconds" => {
                    if let Some(value) = cfg.take_parsed(args, &mut i) {
                        cfg.run_seconds = Some(value);
                    }
                }
                "--bind" => {
                    if let Some(value) = cfg.take_value(args, &mut i) {
                        cfg.bind_addr = value;
                    }
                }
                "--no-bridge" => {
                    cfg.bridge_enabled = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if let Some(value) = cfg.take_value(args, &mut i) {
                        cfg.log_dir = Some(PathBuf::from(value));
                    }
                }
                "--metrics-addr" => {
                    if let Some(value) = cfg.take_value(args, &mut i) {
                        cfg.metrics_addr = Some(value);
                    }
                }
                "--audit-log" => {
                    if let Some(value) = cfg.take_value(args, &mut i) {
                        cfg.audit_path = Some(PathBuf::from(value));
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => {
                    cfg.warnings.push(format!("ignoring unknown argument `{other}`"));
                }
            }
            i += 1;
        }
        cfg
    }

    /// Value following the flag at `args[*i]`; advances `i` past it.
    fn take_value(&mut self, args: &[String], i: &mut usize) -> Option<String> {
        match args.get(*i + 1) {
            Some(value) => {
                *i += 1;
                Some(value.clone())
            }
            None => {
                self.warnings
                    .push(format!("`{}` expects a value; keeping default", args[*i]));
                None
            }
        }
    }

    fn take_parsed<T: FromStr>(&mut self, args: &[String], i: &mut usize) -> Option<T> {
        let flag = args[*i].clone();
        let raw = self.take_value(args, i)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings
                    .push(format!("invalid value `{raw}` for `{flag}`; keeping default"));
                None
            }
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let device = DeviceConfig::new(self.plc_addr.clone().unwrap_or_default())
            .with_device_id(self.unit_id)
            .with_io_timeout(Duration::from_millis(self.io_timeout_ms));
        EngineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            device,
            start_running: self.start_running,
        }
    }

    pub fn print_help() {
        println!(
            r#"plc-monitor - PLC data acquisition with simulation fallback

USAGE:
    plc-monitor [OPTIONS]

OPTIONS:
    --plc <ADDR>              Modbus TCP address of the PLC (ip or ip:port, port 502 by default)
    --unit-id <N>             Modbus unit id [default: 1]
    --poll-interval-ms <MS>   Poll period [default: 500]
    --io-timeout-ms <MS>      Upper bound for one PLC request, below the poll period [default: 200]
    --start-running           Start with the run command set
    --seed <N>                Seed the simulator for a reproducible trajectory
    --bind <ADDR>             Bridge TCP bind address [default: 127.0.0.1:7000]
    --no-bridge               Disable the TCP bridge
    --run-seconds <SECS>      Run for a fixed duration then exit
    --json-logs               Output logs in JSON format (for log aggregation)
    --log-dir <PATH>          Also write JSON logs to a daily rolling file in PATH
    --metrics-addr <ADDR>     Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>        Append connection changes to a JSONL audit file
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log filter (e.g., RUST_LOG=debug,monitor_io=trace)

EXAMPLES:
    # Simulation only, bridge on the default port
    plc-monitor

    # Live PLC with metrics and audit trail
    plc-monitor --plc 192.168.1.10 --metrics-addr 0.0.0.0:9090 --audit-log /var/log/plc-monitor/audit.jsonl

    # Short reproducible run
    plc-monitor --run-seconds 10 --no-bridge --start-running --seed 42
"#
        );
    }
}
