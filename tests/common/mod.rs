//! Shared harness for integration tests: in-memory stores and queue, a fixed
//! umbrella resolver and an admission control that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use outreach_core::capacity::{AdmissionControl, CapacityResolver, CapacityResult};
use outreach_core::config::QueuesConfig;
use outreach_core::database::{
    ContactStore, CoreStores, EnrollmentStore, InMemoryContactStore, InMemoryEnrollmentStore,
    InMemoryHealingAuditStore, InMemoryStepStore, InMemoryUmbrellaStore, StepStore,
};
use outreach_core::events::EventPublisher;
use outreach_core::messaging::{ContentTranscoder, InMemoryJobQueue};
use outreach_core::models::{
    Channel, Contact, Credential, Enrollment, Step, StepContent, StepFlags, UmbrellaMapping,
};
use outreach_core::orchestration::{
    ChannelDispatcher, EnrollmentEventProcessor, HealingExecutor, KeywordIntentClassifier,
    StandardFailureDiagnosis,
};

/// Admission calls seen by [`RecordingAdmission`]
#[derive(Debug, Default, Clone)]
pub struct AdmissionState {
    pub acquired: Vec<(Uuid, Uuid)>,
    pub released: Vec<(Uuid, Uuid)>,
    /// When set, every acquire is denied
    pub deny: bool,
}

#[derive(Clone, Default)]
pub struct RecordingAdmission {
    pub state: Arc<Mutex<AdmissionState>>,
}

impl RecordingAdmission {
    pub fn releases(&self) -> Vec<(Uuid, Uuid)> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn acquisitions(&self) -> Vec<(Uuid, Uuid)> {
        self.state.lock().unwrap().acquired.clone()
    }
}

#[async_trait]
impl AdmissionControl for RecordingAdmission {
    async fn acquire(&self, umbrella_id: Uuid, tenant_id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.deny {
            return false;
        }
        state.acquired.push((umbrella_id, tenant_id));
        true
    }

    async fn release(&self, umbrella_id: Uuid, tenant_id: Uuid) {
        self.state.lock().unwrap().released.push((umbrella_id, tenant_id));
    }
}

/// Resolves every tenant to the same umbrella
pub struct FixedResolver {
    pub umbrella_id: Uuid,
}

#[async_trait]
impl CapacityResolver for FixedResolver {
    async fn resolve(&self, tenant_id: Uuid) -> CapacityResult<UmbrellaMapping> {
        Ok(UmbrellaMapping {
            umbrella_id: self.umbrella_id,
            tenant_id,
            account_type: "vapi".to_string(),
            credential: Credential::new("test-secret"),
            concurrency_limit: 10,
            tenant_cap: 10,
            priority_weight: 1,
        })
    }

    async fn invalidate(&self, _tenant_id: Uuid) {}
}

pub struct TestHarness {
    pub processor: Arc<EnrollmentEventProcessor>,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub enrollments: Arc<InMemoryEnrollmentStore>,
    pub contacts: Arc<InMemoryContactStore>,
    pub steps: Arc<InMemoryStepStore>,
    pub audit: Arc<InMemoryHealingAuditStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub admission: RecordingAdmission,
    pub publisher: EventPublisher,
    pub queues: QueuesConfig,
    pub umbrella_id: Uuid,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_max_step_rewinds(5)
    }

    pub fn with_max_step_rewinds(max_step_rewinds: u32) -> Self {
        let enrollments = Arc::new(InMemoryEnrollmentStore::new());
        let contacts = Arc::new(InMemoryContactStore::new());
        let steps = Arc::new(InMemoryStepStore::new());
        let audit = Arc::new(InMemoryHealingAuditStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let stores = CoreStores {
            enrollments: enrollments.clone(),
            contacts: contacts.clone(),
            steps: steps.clone(),
            audit: audit.clone(),
            umbrellas: Arc::new(InMemoryUmbrellaStore::new()),
        };

        let umbrella_id = Uuid::new_v4();
        let resolver: Arc<dyn CapacityResolver> = Arc::new(FixedResolver { umbrella_id });
        let admission = RecordingAdmission::default();
        let publisher = EventPublisher::default();
        let queues = QueuesConfig::default();

        let dispatcher = Arc::new(ChannelDispatcher::new(
            queue.clone(),
            resolver.clone(),
            Arc::new(admission.clone()),
            Arc::new(ContentTranscoder::new()),
            queues.clone(),
        ));
        let executor = Arc::new(HealingExecutor::new(
            &stores,
            dispatcher.clone(),
            publisher.clone(),
            max_step_rewinds,
        ));
        let processor = Arc::new(EnrollmentEventProcessor::new(
            stores,
            Arc::new(StandardFailureDiagnosis::new()),
            executor,
            resolver,
            Arc::new(admission.clone()),
            Arc::new(KeywordIntentClassifier::new()),
            publisher.clone(),
        ));

        Self {
            processor,
            dispatcher,
            enrollments,
            contacts,
            steps,
            audit,
            queue,
            admission,
            publisher,
            queues,
            umbrella_id,
        }
    }

    /// Store a contact and an enrollment whose last dispatched step is
    /// `current_step`
    pub async fn enroll(&self, contact: &Contact, sequence_id: Uuid, current_step: i32) -> Enrollment {
        self.contacts.insert(contact).await.unwrap();
        let mut enrollment = Enrollment::new(contact.tenant_id, contact.contact_id, sequence_id);
        enrollment.current_step = current_step;
        self.enrollments.insert(&enrollment).await.unwrap();
        enrollment
    }

    pub async fn add_step(&self, sequence_id: Uuid, order_index: i32, channel: Channel) -> Step {
        let content = match channel {
            Channel::Sms => StepContent::sms("Hi {{first_name}}, quick question for you"),
            Channel::Email => StepContent::Email {
                subject: Some("Quick question".to_string()),
                body_html: Some("<p>Hi there</p>".to_string()),
                body_text: None,
            },
            Channel::Voice => StepContent::voice("Hi, this is Ana from the front desk"),
        };
        let step = Step {
            step_id: Uuid::new_v4(),
            sequence_id,
            order_index,
            channel,
            content,
            flags: StepFlags::default(),
        };
        self.steps.insert(&step).await.unwrap();
        step
    }

    pub async fn reload(&self, enrollment_id: Uuid) -> Enrollment {
        self.enrollments.find(enrollment_id).await.unwrap().unwrap()
    }

    pub async fn reload_contact(&self, contact_id: Uuid) -> Contact {
        self.contacts.find(contact_id).await.unwrap().unwrap()
    }
}
