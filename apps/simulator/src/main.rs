//! SLS 虚拟探测器
//!
//! 在本机为每个模块和接收器各开一个 TCP 端口，线上格式与真实设备一致。
//! 配合 `--write-setup` 生成的安装文件，`sls-cli` 可以直接对它做完整采集。

mod singleton;

use anyhow::{Context, Result};
use clap::Parser;
use singleton::SingletonLock;
use sls_sdk::ModuleKind;
use sls_sdk::tools::{
    AcquisitionPolicy, DetectorSetup, GeometrySetup, HealthThresholds, ModuleSetup, ReceiverSetup,
};
use sls_sdk::transport::{SimDevice, SimServer, VirtualDetector};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sls-sim")]
#[command(about = "Virtual SLS detector served over TCP", long_about = None)]
struct Args {
    /// 模块型号
    #[arg(long, default_value = "eiger")]
    kind: ModuleKind,

    /// 模块数量（单行排列）
    #[arg(short = 'n', long, default_value_t = 2)]
    modules: usize,

    /// 监听地址
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// 第一个模块的端口，模块 i 使用 `module_port + i`
    #[arg(long, default_value_t = 19520)]
    module_port: u16,

    /// 第一个接收器的端口，接收器 i 使用 `receiver_port + i`
    #[arg(long, default_value_t = 19540)]
    receiver_port: u16,

    /// 曝光时间缩放（小于 1 时采集更快）
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// 把对应的安装文件写到这里
    #[arg(long)]
    write_setup: Option<PathBuf>,

    /// 安装文件中的探测器标识
    #[arg(long, default_value = "sim")]
    detector_id: String,

    /// 单实例锁文件路径
    #[arg(long)]
    lock_file: Option<PathBuf>,
}

/// 端口分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortPlan {
    module_base: u16,
    receiver_base: u16,
    count: usize,
}

impl PortPlan {
    fn new(module_base: u16, receiver_base: u16, count: usize) -> Result<Self> {
        if count == 0 {
            anyhow::bail!("At least one module is required");
        }
        let span = u16::try_from(count).context("Too many modules")?;
        let module_end = module_base
            .checked_add(span)
            .context("Module ports exceed 65535")?;
        let receiver_end = receiver_base
            .checked_add(span)
            .context("Receiver ports exceed 65535")?;
        if module_base < receiver_end && receiver_base < module_end {
            anyhow::bail!(
                "Module ports {}..{} overlap receiver ports {}..{}",
                module_base,
                module_end,
                receiver_base,
                receiver_end
            );
        }
        Ok(Self {
            module_base,
            receiver_base,
            count,
        })
    }

    fn module(&self, index: usize) -> u16 {
        self.module_base + index as u16
    }

    fn receiver(&self, index: usize) -> u16 {
        self.receiver_base + index as u16
    }
}

/// 生成指向本模拟器的安装文件
fn setup_for(detector_id: &str, kind: ModuleKind, host: &str, plan: PortPlan) -> DetectorSetup {
    let modules = (0..plan.count)
        .map(|index| ModuleSetup {
            hostname: host.to_string(),
            port: Some(plan.module(index)),
            receiver: ReceiverSetup {
                hostname: host.to_string(),
                port: Some(plan.receiver(index)),
                stream: None,
            },
        })
        .collect();
    DetectorSetup {
        detector_id: detector_id.to_string(),
        kind,
        geometry: GeometrySetup {
            rows: 1,
            cols: plan.count,
        },
        modules,
        request_timeout_ms: 1000,
        session_dir: None,
        health: HealthThresholds::default(),
        acquisition: AcquisitionPolicy::default(),
    }
}

fn default_lock_file(plan: &PortPlan) -> PathBuf {
    let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    dir.join(format!("sls-sim-{}.lock", plan.module_base))
}

fn main() -> Result<()> {
    sls_sdk::init_logging_with("sls_sim=info,sls_transport=info");
    let args = Args::parse();

    let plan = PortPlan::new(args.module_port, args.receiver_port, args.modules)?;
    let lock_file = args.lock_file.clone().unwrap_or_else(|| default_lock_file(&plan));
    let _lock = SingletonLock::try_lock(&lock_file)
        .with_context(|| format!("Another simulator holds {}", lock_file.display()))?;

    let detector = VirtualDetector::new(args.kind, args.modules);
    detector.set_time_scale(args.time_scale);

    let mut servers = Vec::with_capacity(args.modules * 2);
    for index in 0..detector.len() {
        let module: Arc<dyn SimDevice> = detector.module(index).clone();
        servers.push(
            SimServer::spawn((args.bind.as_str(), plan.module(index)), module)
                .with_context(|| format!("Cannot bind module {index}"))?,
        );
        let receiver: Arc<dyn SimDevice> = detector.receiver(index).clone();
        servers.push(
            SimServer::spawn((args.bind.as_str(), plan.receiver(index)), receiver)
                .with_context(|| format!("Cannot bind receiver {index}"))?,
        );
    }

    if let Some(path) = &args.write_setup {
        setup_for(&args.detector_id, args.kind, &args.bind, plan)
            .save(path)
            .with_context(|| format!("Cannot write setup {}", path.display()))?;
        info!("Setup written to {}", path.display());
    }

    eprintln!("sls-sim: {} x {}", args.modules, args.kind);
    eprintln!(
        "  modules:   {}:{}..{}",
        args.bind,
        plan.module(0),
        plan.module(args.modules - 1)
    );
    eprintln!(
        "  receivers: {}:{}..{}",
        args.bind,
        plan.receiver(0),
        plan.receiver(args.modules - 1)
    );
    eprintln!("  lock:      {}", lock_file.display());
    eprintln!("Press Ctrl-C to stop");

    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Cannot install Ctrl-C handler")?;
    let _ = rx.recv();

    info!("Shutting down {} servers", servers.len());
    for server in &mut servers {
        server.shutdown();
    }
    Ok(())
}
