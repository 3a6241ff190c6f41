//! 门诊就诊全流程测试

use chrono::{Local, Utc};
use opd_core::utils::is_valid_token;
use opd_core::{
    LabOrder, LabPriority, MedicineOrder, OpdError, Order, OrderDetails, OrderStatus, Patient,
    RegistrationChannel, ResultsReview, Step, VisitRecord, VisitState, VisitStatus,
};
use opd_store::{ChangeEvent, InMemoryPatientDirectory, InMemoryStore, RecordStore};
use opd_workflow::{
    ChannelHandoff, DischargeDecision, DischargeOutcome, EntryOutcome, EntryRequest, HandoffMessage,
    HandoffTarget, RegistrationRequest, TransitionRequest, VisitEvent, VisitPatch, WorkflowEngine,
    WorkflowSettings,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    engine: Arc<WorkflowEngine>,
    store: Arc<InMemoryStore>,
    emergency: UnboundedReceiver<HandoffMessage>,
    admissions: UnboundedReceiver<HandoffMessage>,
    patient: Patient,
}

fn patient(name: &str) -> Patient {
    Patient {
        id: Uuid::new_v4(),
        mrn: format!("MRN-{}", &Uuid::new_v4().simple().to_string()[..6]),
        name: name.to_string(),
        phone: Some("9800000000".to_string()),
        sex: None,
        birth_date: None,
        created_at: Utc::now(),
    }
}

fn harness() -> Harness {
    let patient = patient("Meera Iyer");
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(InMemoryPatientDirectory::with_patients(vec![patient.clone()]));
    let (emergency_sink, emergency) = ChannelHandoff::new();
    let (inpatient_sink, admissions) = ChannelHandoff::new();

    let engine = WorkflowEngine::new(
        store.clone(),
        directory,
        Arc::new(emergency_sink),
        Arc::new(inpatient_sink),
        WorkflowSettings::default(),
    );

    Harness {
        engine: Arc::new(engine),
        store,
        emergency,
        admissions,
        patient,
    }
}

fn lab(test_name: &str) -> OrderDetails {
    OrderDetails::Lab(LabOrder {
        test_name: test_name.to_string(),
        priority: LabPriority::Routine,
    })
}

fn medicine(name: &str) -> OrderDetails {
    OrderDetails::Medicine(MedicineOrder {
        name: name.to_string(),
        dosage: "10mg".to_string(),
        frequency: "OD".to_string(),
        duration: Some("5 days".to_string()),
    })
}

async fn open_routine(h: &Harness) -> VisitRecord {
    let outcome = h
        .engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: h.patient.id,
            is_emergency: false,
            triage_notes: "Palpitations since morning".to_string(),
        })
        .await
        .unwrap();
    match outcome {
        EntryOutcome::AwaitingRegistration(visit) => visit,
        other => panic!("unexpected outcome: {:?}", other),
    }
}

async fn register(h: &Harness, visit_id: Uuid, department: &str) -> opd_workflow::RegistrationReceipt {
    h.engine
        .registration()
        .register(RegistrationRequest {
            visit_id,
            department: department.to_string(),
            channel: RegistrationChannel::WalkIn,
        })
        .await
        .unwrap()
}

async fn at_investigation(h: &Harness, orders: Vec<OrderDetails>) -> (VisitRecord, Vec<Order>) {
    let visit = open_routine(h).await;
    register(h, visit.id, "CARD").await;
    let outcome = h
        .engine
        .investigation()
        .place_orders(visit.id, orders)
        .await
        .unwrap();
    (outcome.visit, outcome.orders)
}

fn completed_review() -> VisitPatch {
    VisitPatch {
        results_review: Some(ResultsReview {
            all_orders_completed: true,
            pending_orders: 0,
            manual_override: false,
            reviewed_at: Utc::now(),
        }),
        ..Default::default()
    }
}

async fn complete(h: &Harness, order: &Order) {
    let ledger = h.engine.ledger();
    ledger.advance_order_status(order.id, OrderStatus::InProgress).await.unwrap();
    ledger.advance_order_status(order.id, OrderStatus::Completed).await.unwrap();
}

#[tokio::test]
async fn routine_visit_ends_discharged_with_summary() {
    let h = harness();
    let visit = open_routine(&h).await;
    assert_eq!(visit.current_step(), Step::Entry);
    assert_eq!(visit.status(), VisitStatus::InProgress);

    let receipt = register(&h, visit.id, "card").await;
    let today = Local::now().date_naive().format("%Y%m%d").to_string();
    assert_eq!(receipt.token_number, format!("OPD-CARD-{}-001", today));
    assert!(is_valid_token(&receipt.token_number));
    assert_eq!(receipt.visit.current_step(), Step::Consultation);
    assert_eq!(receipt.queue_position, 0);
    assert_eq!(receipt.estimated_wait_minutes, 0);

    let placed = h
        .engine
        .investigation()
        .place_orders(visit.id, vec![lab("Troponin I"), medicine("Metoprolol")])
        .await
        .unwrap();
    assert_eq!(placed.visit.current_step(), Step::Investigation);
    assert_eq!(placed.orders.len(), 2);

    let blocked = h.engine.results().review(visit.id, false).await;
    assert!(matches!(blocked, Err(OpdError::Validation(_))));

    for order in &placed.orders {
        complete(&h, order).await;
    }
    let results = h.engine.results().review(visit.id, false).await.unwrap();
    assert!(results.review.all_orders_completed);
    assert_eq!(results.visit.current_step(), Step::Results);

    let outcome = h
        .engine
        .discharge()
        .decide(
            visit.id,
            DischargeDecision::Discharge {
                discharge_diagnosis: "Sinus tachycardia".to_string(),
                treatment_summary: "Beta blocker started".to_string(),
                special_instructions: Some("Review in 2 weeks".to_string()),
            },
        )
        .await
        .unwrap();

    let (visit, summary) = match outcome {
        DischargeOutcome::Discharged { visit, summary } => (visit, summary),
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(visit.status(), VisitStatus::Discharged);
    assert_eq!(visit.admission_required, Some(false));
    assert_eq!(visit.token_number.as_deref(), Some(receipt.token_number.as_str()));
    assert_eq!(visit.history.len(), 6);
    assert!(!summary.admission_required);

    let stored = h.store.get_discharge_summary(visit.id).await.unwrap().unwrap();
    assert_eq!(stored.id, summary.id);
}

#[tokio::test]
async fn admitted_visit_has_no_discharge_summary() {
    let mut h = harness();
    let (visit, _) = at_investigation(&h, Vec::new()).await;

    // 没有医嘱时视为全部完成
    h.engine.results().review(visit.id, false).await.unwrap();
    let outcome = h
        .engine
        .discharge()
        .decide(visit.id, DischargeDecision::Admit)
        .await
        .unwrap();

    assert_eq!(outcome.visit().state, VisitState::Admitted);
    assert_eq!(outcome.visit().admission_required, Some(true));
    assert!(h.store.get_discharge_summary(visit.id).await.unwrap().is_none());

    let handoff = h.admissions.recv().await.unwrap();
    assert_eq!(handoff.target, HandoffTarget::Inpatient);
    assert_eq!(handoff.visit_id, visit.id);

    // 决定只能做一次
    let again = h
        .engine
        .discharge()
        .decide(
            visit.id,
            DischargeDecision::Discharge {
                discharge_diagnosis: "n/a".to_string(),
                treatment_summary: "n/a".to_string(),
                special_instructions: None,
            },
        )
        .await;
    assert!(matches!(again, Err(OpdError::IllegalTransition { .. })));
    assert!(h.store.get_discharge_summary(visit.id).await.unwrap().is_none());
}

#[tokio::test]
async fn emergency_visit_never_reenters_outpatient_graph() {
    let mut h = harness();
    let outcome = h
        .engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: h.patient.id,
            is_emergency: true,
            triage_notes: "Crushing chest pain, diaphoretic".to_string(),
        })
        .await
        .unwrap();

    let visit = match outcome {
        EntryOutcome::EmergencyRedirected(visit) => visit,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(visit.state, VisitState::EmergencyExit);
    assert_eq!(h.emergency.recv().await.unwrap().visit_id, visit.id);

    let registration = h
        .engine
        .registration()
        .register(RegistrationRequest {
            visit_id: visit.id,
            department: "CARD".to_string(),
            channel: RegistrationChannel::WalkIn,
        })
        .await;
    assert!(matches!(registration, Err(OpdError::IllegalTransition { .. })));

    let orders = h.engine.investigation().place_orders(visit.id, vec![lab("ECG")]).await;
    assert!(matches!(orders, Err(OpdError::IllegalTransition { .. })));

    for (step, event) in [
        (Step::Entry, VisitEvent::Register),
        (Step::Entry, VisitEvent::Cancel),
        (Step::Results, VisitEvent::BeginDischarge),
    ] {
        let result = h
            .engine
            .orchestrator()
            .transition(TransitionRequest::new(visit.id, step, event))
            .await;
        assert!(matches!(result, Err(OpdError::IllegalTransition { .. })));
    }

    let stored = h.engine.visit(visit.id).await.unwrap();
    assert_eq!(stored.state, VisitState::EmergencyExit);
    assert!(stored.token_number.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_transitions_exactly_one_wins() {
    let h = harness();
    let (visit, _) = at_investigation(&h, Vec::new()).await;
    let visit_id = visit.id;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .orchestrator()
                .transition(
                    TransitionRequest::new(visit_id, Step::Investigation, VisitEvent::ReviewResults)
                        .with_patch(completed_review()),
                )
                .await
        }));
    }

    let mut successes = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(OpdError::StaleState { .. }) => stale += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(stale, 1);
    assert_eq!(h.engine.visit(visit.id).await.unwrap().current_step(), Step::Results);
}

#[tokio::test]
async fn tokens_follow_department_registration_count() {
    let h = harness();
    let first = open_routine(&h).await;
    let second = open_routine(&h).await;
    let other_department = open_routine(&h).await;

    let first_receipt = register(&h, first.id, "CARD").await;
    let second_receipt = register(&h, second.id, "CARD").await;
    let ent_receipt = register(&h, other_department.id, "ENT").await;

    assert!(first_receipt.token_number.ends_with("-001"));
    assert!(second_receipt.token_number.ends_with("-002"));
    assert!(ent_receipt.token_number.starts_with("OPD-ENT-"));
    assert!(ent_receipt.token_number.ends_with("-001"));

    assert_eq!(second_receipt.queue_position, 1);
    assert_eq!(second_receipt.estimated_wait_minutes, 5);

    let overview = h.engine.queue_overview().await.unwrap();
    assert_eq!(overview.consultation_queue_by_department.get("CARD"), Some(&2));
    assert_eq!(overview.estimated_wait_by_department.get("CARD"), Some(&10));
    assert_eq!(overview.visits_by_step.get(&Step::Consultation), Some(&3));
    assert_eq!(overview.awaiting_registration, 0);
    assert_eq!(overview.total_active_visits, 3);
}

#[tokio::test]
async fn invalid_registration_leaves_visit_at_entry() {
    let h = harness();
    let visit = open_routine(&h).await;

    let result = h
        .engine
        .registration()
        .register(RegistrationRequest {
            visit_id: visit.id,
            department: "".to_string(),
            channel: RegistrationChannel::Online,
        })
        .await;
    assert!(matches!(result, Err(OpdError::Validation(_))));

    let stored = h.engine.visit(visit.id).await.unwrap();
    assert_eq!(stored.current_step(), Step::Entry);
    assert!(stored.token_number.is_none());

    let overview = h.engine.queue_overview().await.unwrap();
    assert_eq!(overview.awaiting_registration, 1);
}

#[tokio::test]
async fn triage_input_is_validated() {
    let h = harness();

    let unknown_patient = h
        .engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: Uuid::new_v4(),
            is_emergency: false,
            triage_notes: "Dizziness".to_string(),
        })
        .await;
    assert!(matches!(unknown_patient, Err(OpdError::NotFound(_))));

    let blank_notes = h
        .engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: h.patient.id,
            is_emergency: false,
            triage_notes: "   ".to_string(),
        })
        .await;
    assert!(matches!(blank_notes, Err(OpdError::Validation(_))));
}

#[tokio::test]
async fn manual_override_is_recorded() {
    let h = harness();
    let (visit, orders) = at_investigation(&h, vec![lab("Blood culture")]).await;
    assert_eq!(orders.len(), 1);

    let outcome = h.engine.results().review(visit.id, true).await.unwrap();
    assert!(!outcome.review.all_orders_completed);
    assert_eq!(outcome.pending_orders.len(), 1);

    let stored = h.engine.visit(visit.id).await.unwrap();
    let review = stored.results_review.unwrap();
    assert!(review.manual_override);
    assert_eq!(review.pending_orders, 1);
}

#[tokio::test]
async fn results_gate_reopens_when_new_order_added() {
    let h = harness();
    let (visit, orders) = at_investigation(&h, vec![lab("CBC")]).await;
    complete(&h, &orders[0]).await;
    assert!(h.engine.ledger().all_completed(visit.id).await.unwrap());

    h.engine
        .ledger()
        .create_order(visit.id, visit.patient_id, opd_core::OrderType::Lab, lab("ESR"))
        .await
        .unwrap();
    assert!(!h.engine.ledger().all_completed(visit.id).await.unwrap());

    let blocked = h.engine.results().review(visit.id, false).await;
    assert!(matches!(blocked, Err(OpdError::Validation(_))));
}

#[tokio::test]
async fn direct_transition_cannot_skip_results_gate() {
    let h = harness();
    let (visit, _) = at_investigation(&h, vec![lab("Troponin I")]).await;

    let bare = h
        .engine
        .orchestrator()
        .transition(TransitionRequest::new(visit.id, Step::Investigation, VisitEvent::ReviewResults))
        .await;
    assert!(matches!(bare, Err(OpdError::Validation(_))));

    let claimed = h
        .engine
        .orchestrator()
        .transition(
            TransitionRequest::new(visit.id, Step::Investigation, VisitEvent::ReviewResults)
                .with_patch(completed_review()),
        )
        .await;
    assert!(matches!(claimed, Err(OpdError::Validation(_))));

    let stored = h.engine.visit(visit.id).await.unwrap();
    assert_eq!(stored.current_step(), Step::Investigation);
    assert!(stored.results_review.is_none());
}

#[tokio::test]
async fn orders_closed_once_results_reviewed() {
    let h = harness();
    let (visit, orders) = at_investigation(&h, vec![lab("CBC")]).await;
    complete(&h, &orders[0]).await;
    h.engine.results().review(visit.id, false).await.unwrap();

    let late = h
        .engine
        .ledger()
        .create_order(visit.id, visit.patient_id, opd_core::OrderType::Lab, lab("ESR"))
        .await;
    assert!(matches!(late, Err(OpdError::IllegalTransition { .. })));
    assert_eq!(h.engine.ledger().list_orders(visit.id, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn registration_resumes_after_token_was_assigned() {
    let h = harness();
    let visit = open_routine(&h).await;

    // 号码已分配、尚未进入接诊时中断
    let token = format!("OPD-GEN-{}-001", Local::now().date_naive().format("%Y%m%d"));
    h.engine
        .orchestrator()
        .transition(
            TransitionRequest::new(visit.id, Step::Entry, VisitEvent::Register).with_patch(VisitPatch {
                token_number: Some(token.clone()),
                department: Some("GEN".to_string()),
                registration_channel: Some(RegistrationChannel::WalkIn),
                registered_at: Some(Utc::now()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    let receipt = h
        .engine
        .registration()
        .register(RegistrationRequest {
            visit_id: visit.id,
            department: "GEN".to_string(),
            channel: RegistrationChannel::WalkIn,
        })
        .await
        .unwrap();
    assert_eq!(receipt.token_number, token);
    assert_eq!(receipt.visit.current_step(), Step::Consultation);
    assert_eq!(receipt.visit.token_number.as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn cancelling_a_visit_cancels_open_orders() {
    let h = harness();
    let (visit, orders) = at_investigation(&h, vec![lab("Dengue NS1"), medicine("Paracetamol")]).await;
    h.engine
        .ledger()
        .advance_order_status(orders[0].id, OrderStatus::InProgress)
        .await
        .unwrap();

    let cancelled = h
        .engine
        .cancel_visit(visit.id, Step::Investigation, "Patient left against advice")
        .await
        .unwrap();
    assert_eq!(cancelled.status(), VisitStatus::Cancelled);
    assert_eq!(
        cancelled.history.last().and_then(|t| t.note.clone()).as_deref(),
        Some("Patient left against advice")
    );

    let stats = h.engine.ledger().order_stats(visit.id).await.unwrap();
    assert_eq!(stats.cancelled, 2);

    let complete = h
        .engine
        .ledger()
        .advance_order_status(orders[0].id, OrderStatus::Completed)
        .await;
    assert!(matches!(complete, Err(OpdError::IllegalTransition { .. })));

    let discharge = h.engine.discharge().decide(visit.id, DischargeDecision::Admit).await;
    assert!(matches!(discharge, Err(OpdError::IllegalTransition { .. })));
}

#[tokio::test]
async fn cancellation_can_be_disabled() {
    let patient = patient("Kiran Rao");
    let store = Arc::new(InMemoryStore::new());
    let engine = WorkflowEngine::new(
        store,
        Arc::new(InMemoryPatientDirectory::with_patients(vec![patient.clone()])),
        Arc::new(opd_workflow::LoggingHandoff),
        Arc::new(opd_workflow::LoggingHandoff),
        WorkflowSettings {
            minutes_per_patient: 8,
            allow_cancellation: false,
        },
    );

    let outcome = engine
        .triage()
        .open_visit(EntryRequest {
            patient_id: patient.id,
            is_emergency: false,
            triage_notes: "Ear pain".to_string(),
        })
        .await
        .unwrap();

    let result = engine.cancel_visit(outcome.visit().id, Step::Entry, "duplicate").await;
    assert!(matches!(result, Err(OpdError::IllegalTransition { .. })));
    assert_eq!(engine.estimator().estimate_wait(2), 16);
}

#[tokio::test]
async fn change_feed_reports_visit_progress() {
    let h = harness();
    let mut feed = h.engine.subscribe();

    let visit = open_routine(&h).await;
    assert_eq!(feed.recv().await.unwrap(), ChangeEvent::VisitCreated { visit_id: visit.id });

    register(&h, visit.id, "GEN").await;
    assert_eq!(
        feed.recv().await.unwrap(),
        ChangeEvent::VisitUpdated {
            visit_id: visit.id,
            state: VisitState::Active(Step::Registration)
        }
    );
    assert_eq!(
        feed.recv().await.unwrap(),
        ChangeEvent::VisitUpdated {
            visit_id: visit.id,
            state: VisitState::Active(Step::Consultation)
        }
    );
}
