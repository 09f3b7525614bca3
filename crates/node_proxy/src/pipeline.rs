use std::collections::HashMap;
use std::time::Duration;

use cc_container::{build_tar, ContainerError, ContainerSpec, ContainerStatusFilter};
use cc_store::batch_failure;
use cc_types::{
    command_builder::generate_command, AgentResult, Batch, BatchHistoryEntry, BatchState, Experiment, GpuDeviceId,
    AGENT_ARCHIVE_ROOT, INPUT_CONNECTOR_ENTRY_POINT, OUTPUT_CONNECTOR_ENTRY_POINT, SHARED_VOLUME_MOUNT,
};
use chrono::Utc;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::error::ProxyError;
use crate::proxy::NodeProxy;
use crate::secrets::substitute_secrets;
use crate::shell::build_execution_script;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn experiment_volume_name(experiment_id: &str) -> String {
    format!("cc-{experiment_id}")
}

fn failure_debug_info(result: &AgentResult) -> Option<String> {
    match result {
        AgentResult::Failed { debug_info, .. } => debug_info.clone(),
        AgentResult::Succeeded { .. } => None,
    }
}

impl NodeProxy {
    /// Drives a single `scheduled` batch through its three-container pipeline (spec.md §4.5,
    /// "Batch execution"). Every exit point beyond step 1 has either moved the batch on through
    /// `batch_failure`/CAS or left it for the exit-harvest loop to finish — this function never
    /// leaves a batch silently stuck.
    pub(crate) async fn run_batch(&self, batch_id: &str) -> Result<(), ProxyError> {
        let Some(batch) = self.store.find_batch(batch_id).await? else { return Ok(()) };
        if batch.state != BatchState::Scheduled {
            return Ok(());
        }

        // Step 1: CAS scheduled -> processing_input.
        let stdout_blob_name = batch.stdout_blob_name();
        let stderr_blob_name = batch.stderr_blob_name();
        let applied = self
            .store
            .cas_batch(
                batch_id,
                BatchState::Scheduled,
                Box::new(move |b| {
                    b.state = BatchState::ProcessingInput;
                    b.stdout_blob = Some(stdout_blob_name);
                    b.stderr_blob = Some(stderr_blob_name);
                    b.history.push(BatchHistoryEntry {
                        state: BatchState::ProcessingInput,
                        time: Utc::now(),
                        debug_info: None,
                        node: b.node.clone(),
                        agent_result: None,
                    });
                }),
            )
            .await?;
        if !applied {
            return Ok(()); // a concurrent cancellation won the race
        }

        let Some(batch) = self.store.find_batch(batch_id).await? else { return Ok(()) };
        let Some(experiment) = self.store.find_experiment(&batch.experiment_id).await? else {
            batch_failure(self.store.as_ref(), batch_id, BatchState::ProcessingInput, Some("experiment not found".into()), true)
                .await?;
            return Ok(());
        };

        // Step 2: resolve secrets into a deep copy of the batch's inputs/outputs.
        let secrets = match self.broker.collect(&experiment.secret_keys).await {
            Ok(secrets) => secrets,
            Err(err) => {
                batch_failure(
                    self.store.as_ref(),
                    batch_id,
                    BatchState::ProcessingInput,
                    Some(format!("secret broker: {err}")),
                    !err.is_transient(),
                )
                .await?;
                return Ok(());
            }
        };
        let resolved_inputs: HashMap<String, Value> =
            batch.inputs.iter().map(|(key, value)| (key.clone(), substitute_secrets(&value.value, &secrets))).collect();
        let resolved_outputs: HashMap<String, Value> =
            batch.outputs.iter().map(|(key, value)| (key.clone(), substitute_secrets(&value.value, &secrets))).collect();

        let volume_name = experiment_volume_name(&batch.experiment_id);
        let gpus = batch.used_gpu_ids.clone().unwrap_or_default();

        // Step 3: stale container cleanup from a prior attempt.
        for name in [batch.container_name(None), batch.container_name(Some("input")), batch.container_name(Some("output"))] {
            let _ = self.driver.remove(&name, true).await;
        }

        // Step 4: stage-in container.
        let stage_in_result = match self
            .run_connector_container(&batch, &experiment, "input", INPUT_CONNECTOR_ENTRY_POINT, &volume_name, &gpus, &resolved_inputs)
            .await
        {
            Ok(result) => result,
            Err(err) => return self.fail_with_container_error(batch_id, BatchState::ProcessingInput, err).await,
        };
        if !stage_in_result.is_succeeded() {
            batch_failure(self.store.as_ref(), batch_id, BatchState::ProcessingInput, failure_debug_info(&stage_in_result), false)
                .await?;
            return Ok(());
        }

        // Step 5: CAS processing_input -> processing.
        let applied = self
            .store
            .cas_batch(
                batch_id,
                BatchState::ProcessingInput,
                Box::new(|b| {
                    b.state = BatchState::Processing;
                    b.history.push(BatchHistoryEntry {
                        state: BatchState::Processing,
                        time: Utc::now(),
                        debug_info: None,
                        node: b.node.clone(),
                        agent_result: None,
                    });
                }),
            )
            .await?;
        if !applied {
            return Ok(());
        }

        // Step 6: execution container, collapsed with the finalisation wrapper (spec.md §9 Open
        // Question). Its Cmd runs to completion on its own; we only wait for it here so stage-out
        // (step 7) can safely read what it wrote to the shared volume.
        let command = match generate_command(&experiment.cli.base_command, &experiment.cli.inputs, &resolved_inputs) {
            Ok(command) => command,
            Err(err) => {
                batch_failure(self.store.as_ref(), batch_id, BatchState::Processing, Some(err.to_string()), true).await?;
                return Ok(());
            }
        };
        let script = build_execution_script(&command, experiment.cli.stdout_file.as_deref(), experiment.cli.stderr_file.as_deref());
        let execution_name = batch.container_name(None);
        let execution_spec = ContainerSpec {
            name: execution_name.clone(),
            image: experiment.image.url.clone(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script],
            working_dir: SHARED_VOLUME_MOUNT.to_string(),
            ram_mb: experiment.resources.ram_mb,
            environment: self.environment.clone(),
            volume_name: volume_name.clone(),
            network: self.network.clone(),
            gpus: gpus.clone(),
            enable_fuse: false,
        };
        if let Err(err) = self.create_and_start(&execution_spec).await {
            return self.fail_with_container_error(batch_id, BatchState::Processing, err).await;
        }
        if let Err(err) = self.wait_for_exit(&execution_name).await {
            return self.fail_with_container_error(batch_id, BatchState::Processing, err).await;
        }

        // Step 7: stage-out, only when the experiment declares outputs for this batch.
        if experiment.has_outputs_declared(&batch.outputs) {
            let applied = self
                .store
                .cas_batch(
                    batch_id,
                    BatchState::Processing,
                    Box::new(|b| {
                        b.state = BatchState::ProcessingOutput;
                        b.history.push(BatchHistoryEntry {
                            state: BatchState::ProcessingOutput,
                            time: Utc::now(),
                            debug_info: None,
                            node: b.node.clone(),
                            agent_result: None,
                        });
                    }),
                )
                .await?;
            if applied {
                match self
                    .run_connector_container(
                        &batch,
                        &experiment,
                        "output",
                        OUTPUT_CONNECTOR_ENTRY_POINT,
                        &volume_name,
                        &gpus,
                        &resolved_outputs,
                    )
                    .await
                {
                    Ok(result) if !result.is_succeeded() => {
                        batch_failure(self.store.as_ref(), batch_id, BatchState::ProcessingOutput, failure_debug_info(&result), false)
                            .await?;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.fail_with_container_error(batch_id, BatchState::ProcessingOutput, err).await?;
                    }
                }
            }
        }

        // Step 8 is implicit: the execution container is left `exited` with the final agent JSON
        // on its stdout for check_exited_containers to harvest.
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let id = self.driver.create(spec).await?;
        self.driver.start(&id).await
    }

    /// Polls until the named container leaves `running`/`created`, or has vanished entirely
    /// (already harvested by a concurrent cycle).
    async fn wait_for_exit(&self, name: &str) -> Result<(), ContainerError> {
        loop {
            let containers = self.driver.list(ContainerStatusFilter::Any).await?;
            match containers.iter().find(|c| c.name == name) {
                Some(container) if container.status != "exited" => sleep(EXIT_POLL_INTERVAL).await,
                _ => return Ok(()),
            }
        }
    }

    /// Runs a one-shot connector container (stage-in/stage-out): create an idle container from
    /// the experiment image, inject the resolved descriptor as a tar archive, exec the connector
    /// entry point, then tear the container down. Shared by steps 4 and 7.
    async fn run_connector_container(
        &self,
        batch: &Batch,
        experiment: &Experiment,
        suffix: &str,
        entry_point: &str,
        volume_name: &str,
        gpus: &[GpuDeviceId],
        payload: &HashMap<String, Value>,
    ) -> Result<AgentResult, ContainerError> {
        let spec = ContainerSpec {
            name: batch.container_name(Some(suffix)),
            image: experiment.image.url.clone(),
            command: vec![],
            working_dir: SHARED_VOLUME_MOUNT.to_string(),
            ram_mb: experiment.resources.ram_mb,
            environment: self.environment.clone(),
            volume_name: volume_name.to_string(),
            network: self.network.clone(),
            gpus: gpus.to_vec(),
            enable_fuse: batch.mount,
        };
        let id = self.driver.create(&spec).await?;
        self.driver.start(&id).await?;

        let descriptor = serde_json::to_vec(payload).unwrap_or_default();
        let tar_bytes = build_tar(&[(format!("{suffix}_descriptor.json"), descriptor)])?;
        self.driver.put_archive(&id, AGENT_ARCHIVE_ROOT, tar_bytes).await?;

        let exec_result = self.driver.exec(&id, &[entry_point.to_string()]).await;
        let _ = self.driver.stop(&id).await;
        let _ = self.driver.remove(&id, true).await;
        let exec_result = exec_result?;

        Ok(AgentResult::parse(exec_result.stdout.trim()).unwrap_or_else(|err| {
            warn!(node = %self.name, batch = %batch.id, entry_point, error = %err, "connector stdout was not valid agent-result json");
            AgentResult::Failed {
                debug_info: Some(format!(
                    "{err}: raw stdout was {:?}, stderr was {:?}",
                    exec_result.stdout, exec_result.stderr
                )),
                executed: true,
                return_code: Some(exec_result.exit_code as i32),
                stdout: Some(exec_result.stdout),
                stderr: Some(exec_result.stderr),
                command: None,
            }
        }))
    }

    async fn fail_with_container_error(
        &self,
        batch_id: &str,
        expected_state: BatchState,
        err: ContainerError,
    ) -> Result<(), ProxyError> {
        let daemon_error = err.is_daemon_error();
        batch_failure(self.store.as_ref(), batch_id, expected_state, Some(err.to_string()), false).await?;
        if daemon_error {
            self.notify_inspection();
        }
        Ok(())
    }
}
