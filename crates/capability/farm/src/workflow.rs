//! 工作流服务
//!
//! 工作流是跨设备的有序定时开关步骤。每次执行是一个后台任务：
//! 逐步 `timer_switch`，等待 `duration + wait` 秒后轮询直到通道回落为关，再进入下一步。
//! 同一工作流不能并发执行（返回 `Conflict`）。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use domain::{ConsistencyLevel, StepState, Workflow, random_id};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::FarmError;
use crate::farm::FarmService;
use crate::registry::ServiceRegistry;

const STEP_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STEP_OFF_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WorkflowService {
    farm_id: u64,
    registry: Arc<ServiceRegistry>,
    running: Arc<Mutex<HashSet<u64>>>,
    poll_interval: Duration,
    off_timeout: Duration,
}

impl WorkflowService {
    pub fn new(farm_id: u64, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            farm_id,
            registry,
            running: Arc::new(Mutex::new(HashSet::new())),
            poll_interval: STEP_POLL_INTERVAL,
            off_timeout: STEP_OFF_TIMEOUT,
        }
    }

    /// 调整步骤结束后的轮询间隔与等待上限。
    pub fn with_timing(mut self, poll_interval: Duration, off_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.off_timeout = off_timeout;
        self
    }

    fn farm(&self) -> Result<Arc<FarmService>, FarmError> {
        self.registry.get_farm(self.farm_id)
    }

    pub fn list(&self) -> Result<Vec<Workflow>, FarmError> {
        Ok(self.farm()?.config()?.workflows)
    }

    pub fn get(&self, workflow_id: u64) -> Result<Workflow, FarmError> {
        self.farm()?
            .config()?
            .workflow(workflow_id)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("workflow {workflow_id}")))
    }

    /// 新建工作流（ID 为 0 时分配随机 ID），校验步骤引用的设备与通道。
    pub async fn create(&self, mut workflow: Workflow) -> Result<Workflow, FarmError> {
        if workflow.id == 0 {
            workflow.id = random_id();
        }
        for step in &mut workflow.steps {
            if step.id == 0 {
                step.id = random_id();
            }
            step.state = StepState::Ready;
        }
        self.update(workflow).await
    }

    pub async fn update(&self, workflow: Workflow) -> Result<Workflow, FarmError> {
        let farm = self.farm()?;
        let config = farm.config()?;
        for step in &workflow.steps {
            let device = config
                .device_by_id(step.device_id)
                .ok_or_else(|| FarmError::NotFound(format!("device {}", step.device_id)))?;
            if device.channel_by_id(step.channel_id).is_none() {
                return Err(FarmError::NotFound(format!(
                    "channel {} on device {}",
                    step.channel_id, device.device_type
                )));
            }
        }
        farm.save_workflow(workflow).await
    }

    pub async fn delete(&self, workflow_id: u64) -> Result<(), FarmError> {
        self.farm()?.delete_workflow(workflow_id).await
    }

    pub fn is_running(&self, workflow_id: u64) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(&workflow_id))
            .unwrap_or(false)
    }

    /// 在后台执行工作流，返回任务句柄（结果为执行后的工作流）。
    pub fn run(&self, workflow_id: u64) -> Result<JoinHandle<Result<Workflow, FarmError>>, FarmError> {
        let farm = self.farm()?;
        let workflow = self.get(workflow_id)?;
        let guard = RunGuard::acquire(self.running.clone(), workflow_id)?;
        let poll_interval = self.poll_interval;
        let off_timeout = self.off_timeout;
        info!(
            target: "crop.workflow",
            farm_id = self.farm_id,
            workflow_id,
            steps = workflow.steps.len(),
            "workflow_started"
        );
        Ok(tokio::spawn(async move {
            let _guard = guard;
            let result = execute(&farm, workflow, poll_interval, off_timeout).await;
            match &result {
                Ok(_) => {
                    crop_telemetry::record_workflow_completed();
                    info!(target: "crop.workflow", farm_id = farm.id(), workflow_id, "workflow_completed");
                }
                Err(err) => {
                    crop_telemetry::record_workflow_failed();
                    warn!(target: "crop.workflow", farm_id = farm.id(), workflow_id, error = %err, "workflow_failed");
                    farm.channels().report(None, err);
                }
            }
            result
        }))
    }
}

async fn execute(
    farm: &FarmService,
    mut workflow: Workflow,
    poll_interval: Duration,
    off_timeout: Duration,
) -> Result<Workflow, FarmError> {
    for index in 0..workflow.steps.len() {
        let step = workflow.steps[index].clone();
        match run_step(farm, &workflow, index, poll_interval, off_timeout).await {
            Ok(()) => {
                workflow.steps[index].state = StepState::Completed;
                farm.save_workflow(workflow.clone()).await?;
            }
            Err(err) => {
                warn!(
                    target: "crop.workflow",
                    farm_id = farm.id(),
                    workflow_id = workflow.id,
                    step_id = step.id,
                    error = %err,
                    "workflow_step_failed"
                );
                workflow.steps[index].state = StepState::Error;
                if let Err(save_err) = farm.save_workflow(workflow.clone()).await {
                    warn!(target: "crop.workflow", farm_id = farm.id(), error = %save_err, "workflow_save_failed");
                }
                return Err(err);
            }
        }
    }
    for step in &mut workflow.steps {
        step.state = StepState::Ready;
    }
    workflow.last_completed = Some(Utc::now());
    farm.save_workflow(workflow).await
}

async fn run_step(
    farm: &FarmService,
    workflow: &Workflow,
    index: usize,
    poll_interval: Duration,
    off_timeout: Duration,
) -> Result<(), FarmError> {
    let step = &workflow.steps[index];
    let device = farm.device_by_id(step.device_id)?;
    let device_config = device.config()?;
    let board_id = device_config
        .channel_by_id(step.channel_id)
        .map(|c| c.board_id)
        .ok_or_else(|| FarmError::NotFound(format!("channel {}", step.channel_id)))?;
    let message = format!(
        "workflow {} step {} on {} channel {}",
        workflow.name, step.id, device_config.device_type, step.channel_id
    );
    device.timer_switch(board_id, step.duration, &message).await?;

    let mut executing = workflow.clone();
    executing.steps[index].state = StepState::Executing;
    farm.save_workflow(executing).await?;

    tokio::time::sleep(Duration::from_secs(step.duration + step.wait)).await;

    // 设备可能自行回落，轮询直到通道报告为关。
    let deadline = Instant::now() + off_timeout;
    loop {
        let _ = device.poll().await;
        let in_farm = farm
            .state()?
            .channel_value(&device_config.device_type, board_id);
        let in_store = device
            .get_state(ConsistencyLevel::Local)
            .await?
            .channel(board_id);
        if in_farm == Some(0) || in_store == Some(0) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FarmError::Conflict(format!(
                "channel {} on {} still on after workflow step {}",
                step.channel_id, device_config.device_type, step.id
            )));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// 执行期间占用工作流 ID，任务结束（含 panic）时释放。
struct RunGuard {
    running: Arc<Mutex<HashSet<u64>>>,
    workflow_id: u64,
}

impl RunGuard {
    fn acquire(running: Arc<Mutex<HashSet<u64>>>, workflow_id: u64) -> Result<Self, FarmError> {
        {
            let mut set = running
                .lock()
                .map_err(|_| FarmError::Conflict("workflow registry poisoned".to_string()))?;
            if !set.insert(workflow_id) {
                return Err(FarmError::Conflict(format!(
                    "workflow {workflow_id} is already running"
                )));
            }
        }
        Ok(Self {
            running,
            workflow_id,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.workflow_id);
        }
    }
}
