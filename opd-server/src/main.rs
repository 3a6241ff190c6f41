//! 门诊工作流服务主程序

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use opd_admin::{init_logging, ConfigManager, OpdConfig};
use opd_core::{
    LabOrder, LabPriority, MedicineOrder, OrderDetails, OrderStatus, Patient, RadiologyOrder,
    RegistrationChannel, Sex,
};
use opd_store::{InMemoryPatientDirectory, InMemoryStore};
use opd_workflow::{
    ChannelHandoff, DischargeDecision, EntryRequest, QueueEstimator, RegistrationRequest, WorkflowEngine,
    WorkflowSettings,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 门诊工作流命令行参数
#[derive(Parser, Debug)]
#[command(name = "opd-server")]
#[command(about = "门诊就诊工作流引擎")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 用内存存储跑一组演示就诊
    Demo,
    /// 计算下一个就诊号
    Token {
        /// 科室代码
        #[arg(short, long)]
        department: String,
        /// 今日该科室已挂号人数
        #[arg(short, long, default_value_t = 0)]
        queue_length: usize,
    },
    /// 估算候诊时间
    Wait {
        /// 前面等待的人数
        #[arg(short, long)]
        position: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(args.config.as_deref())?;
    let config = config_manager.get_config().await;
    init_logging(&config.logging, args.log_level.as_deref())?;
    info!(
        "Configuration loaded from {}",
        args.config.as_deref().unwrap_or("defaults and environment")
    );

    let estimator = QueueEstimator::with_minutes_per_patient(config.workflow.minutes_per_patient);

    match args.command {
        Command::Demo => run_demo(&config).await,
        Command::Token {
            department,
            queue_length,
        } => {
            println!("{}", estimator.next_token(&department, queue_length)?);
            Ok(())
        }
        Command::Wait { position } => {
            println!("{} min", estimator.estimate_wait(position));
            Ok(())
        }
    }
}

fn demo_patient(mrn: &str, name: &str, sex: Sex, birth_date: Option<NaiveDate>) -> Patient {
    Patient {
        id: Uuid::new_v4(),
        mrn: mrn.to_string(),
        name: name.to_string(),
        phone: None,
        sex: Some(sex),
        birth_date,
        created_at: Utc::now(),
    }
}

async fn run_demo(config: &OpdConfig) -> Result<()> {
    let patients = vec![
        demo_patient("MRN-1001", "Asha Verma", Sex::Female, NaiveDate::from_ymd_opt(1985, 4, 12)),
        demo_patient("MRN-1002", "Rahul Nair", Sex::Male, NaiveDate::from_ymd_opt(1958, 11, 3)),
        demo_patient("MRN-1003", "Lina Gomez", Sex::Female, None),
        demo_patient("MRN-1004", "Tomas Berg", Sex::Male, NaiveDate::from_ymd_opt(2001, 1, 27)),
    ];

    let store = Arc::new(InMemoryStore::with_capacity(config.store.change_feed_capacity));
    let directory = Arc::new(InMemoryPatientDirectory::with_patients(patients.clone()));
    let (emergency_sink, mut emergency_rx) = ChannelHandoff::new();
    let (inpatient_sink, mut inpatient_rx) = ChannelHandoff::new();

    let engine = WorkflowEngine::new(
        store,
        directory,
        Arc::new(emergency_sink),
        Arc::new(inpatient_sink),
        WorkflowSettings {
            minutes_per_patient: config.workflow.minutes_per_patient,
            allow_cancellation: config.workflow.allow_cancellation,
        },
    );

    info!("Running demo visits for {} patients", patients.len());

    // 常规就诊：检验和用药完成后出院
    let routine = engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: patients[0].id,
            is_emergency: false,
            triage_notes: "Fever for three days, mild cough".to_string(),
        })
        .await?;
    let receipt = engine
        .registration()
        .register(RegistrationRequest {
            visit_id: routine.visit().id,
            department: "GEN".to_string(),
            channel: RegistrationChannel::WalkIn,
        })
        .await?;
    println!(
        "{} registered: token {} (~{} min)",
        patients[0].name, receipt.token_number, receipt.estimated_wait_minutes
    );

    let placed = engine
        .investigation()
        .place_orders(
            receipt.visit.id,
            vec![
                OrderDetails::Lab(LabOrder {
                    test_name: "CBC".to_string(),
                    priority: LabPriority::Routine,
                }),
                OrderDetails::Medicine(MedicineOrder {
                    name: "Paracetamol".to_string(),
                    dosage: "500mg".to_string(),
                    frequency: "TDS".to_string(),
                    duration: Some("3 days".to_string()),
                }),
            ],
        )
        .await?;
    for order in &placed.orders {
        engine.ledger().advance_order_status(order.id, OrderStatus::InProgress).await?;
        engine.ledger().advance_order_status(order.id, OrderStatus::Completed).await?;
    }
    engine.results().review(receipt.visit.id, false).await?;
    let discharged = engine
        .discharge()
        .decide(
            receipt.visit.id,
            DischargeDecision::Discharge {
                discharge_diagnosis: "Viral fever".to_string(),
                treatment_summary: "Symptomatic treatment, CBC within normal limits".to_string(),
                special_instructions: Some("Return if fever persists beyond 5 days".to_string()),
            },
        )
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(discharged.visit()).context("Failed to render visit")?
    );

    // 收住院：影像结果未出，医生人工放行后决定住院
    let admitted = engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: patients[1].id,
            is_emergency: false,
            triage_notes: "Exertional chest tightness".to_string(),
        })
        .await?;
    let receipt = engine
        .registration()
        .register(RegistrationRequest {
            visit_id: admitted.visit().id,
            department: "CARD".to_string(),
            channel: RegistrationChannel::Online,
        })
        .await?;
    engine
        .investigation()
        .place_orders(
            receipt.visit.id,
            vec![OrderDetails::Radiology(RadiologyOrder {
                imaging_type: "CT".to_string(),
                body_part: "Coronary".to_string(),
                clinical_notes: Some("Rule out stenosis".to_string()),
            })],
        )
        .await?;
    let results = engine.results().review(receipt.visit.id, true).await?;
    if !results.pending_orders.is_empty() {
        warn!(
            "Visit {} reviewed with {} pending orders",
            receipt.visit.id,
            results.pending_orders.len()
        );
    }
    engine.discharge().decide(receipt.visit.id, DischargeDecision::Admit).await?;

    // 急诊转出
    engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: patients[2].id,
            is_emergency: true,
            triage_notes: "Sudden onset slurred speech".to_string(),
        })
        .await?;

    // 留在接诊队列
    let waiting = engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: patients[3].id,
            is_emergency: false,
            triage_notes: "Ankle sprain".to_string(),
        })
        .await?;
    engine
        .registration()
        .register(RegistrationRequest {
            visit_id: waiting.visit().id,
            department: "ORTHO".to_string(),
            channel: RegistrationChannel::Existing,
        })
        .await?;

    while let Ok(message) = emergency_rx.try_recv() {
        println!("Emergency handoff: visit {}", message.visit_id);
    }
    while let Ok(message) = inpatient_rx.try_recv() {
        println!("Inpatient handoff: visit {}", message.visit_id);
    }

    let overview = engine.queue_overview().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&overview).context("Failed to render queue overview")?
    );

    Ok(())
}
