//! # Provider Reconciler
//!
//! Validates a Provider: the type must be supported and the referenced
//! credentials Secret must hold the referenced key. Validation failures are
//! user-fixable and end the chain with `ActionRequired` instead of an error.

use super::common::{
    provider_reference, require_action, EnsureFinalizer, RegisterConditions,
    ReleaseWhenUnreferenced,
};
use super::Reconcile;
use crate::config::ControllerConfig;
use crate::constants::{CONDITION_READY, CONDITION_VALIDATED};
use crate::controller::{
    Finalizer, Outcome, ReconcileError, RunResult, Runner, RunnerOptions, Step, StepContext,
};
use crate::crd::{CloudResource, ConditionDefinition, Converged, Provider};
use crate::observability::ControllerMetrics;
use crate::store::ResourceStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const KIND: &str = "provider";

const CONDITIONS: &[ConditionDefinition] = &[
    ConditionDefinition::new(CONDITION_READY),
    ConditionDefinition::new(CONDITION_VALIDATED),
];

pub struct ValidateProvider {
    supported: Vec<String>,
    secrets: Arc<dyn ResourceStore<Secret>>,
}

impl ValidateProvider {
    pub fn new(supported: Vec<String>, secrets: Arc<dyn ResourceStore<Secret>>) -> Self {
        Self { supported, secrets }
    }
}

fn secret_has_key(secret: &Secret, key: &str) -> bool {
    secret.data.as_ref().is_some_and(|d| d.contains_key(key))
        || secret
            .string_data
            .as_ref()
            .is_some_and(|d| d.contains_key(key))
}

#[async_trait]
impl Step<Provider> for ValidateProvider {
    fn name(&self) -> &'static str {
        "validate_provider"
    }

    async fn run(&self, ctx: &mut StepContext<Provider>) -> Result<Outcome, ReconcileError> {
        let provider_type = ctx.resource.spec.r#type.trim().to_lowercase();
        if !self.supported.contains(&provider_type) {
            let message = format!(
                "Unsupported provider type '{}', expected one of: {}",
                ctx.resource.spec.r#type,
                self.supported.join(", ")
            );
            return Ok(require_action(ctx, CONDITION_VALIDATED, message));
        }

        if let Some(secret_ref) = ctx.resource.spec.credentials_secret_ref.clone() {
            let namespace = ctx.resource.namespace_or_default().to_string();
            let secret = self.secrets.get(&namespace, &secret_ref.name).await?;
            match secret {
                None => {
                    let message = format!("Credentials secret {} not found", secret_ref.name);
                    return Ok(require_action(ctx, CONDITION_VALIDATED, message));
                }
                Some(secret) if !secret_has_key(&secret, &secret_ref.key) => {
                    let message = format!(
                        "Credentials secret {} has no key {}",
                        secret_ref.name, secret_ref.key
                    );
                    return Ok(require_action(ctx, CONDITION_VALIDATED, message));
                }
                Some(_) => debug!(secret = %secret_ref.name, "credentials.found"),
            }
        }

        ctx.conditions()
            .success(CONDITION_VALIDATED, format!("Provider type {provider_type} is valid"));
        Ok(Outcome::Continue)
    }
}

pub struct ProviderReconciler {
    runner: Runner<Provider>,
    register: RegisterConditions,
    release: ReleaseWhenUnreferenced<Provider>,
    finalizer: EnsureFinalizer<Provider>,
    validate: ValidateProvider,
}

impl std::fmt::Debug for ProviderReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderReconciler")
            .field("runner", &self.runner)
            .field("supported", &self.validate.supported)
            .finish_non_exhaustive()
    }
}

impl ProviderReconciler {
    pub fn new(
        providers: Arc<dyn ResourceStore<Provider>>,
        cloud_resources: Arc<dyn ResourceStore<CloudResource>>,
        secrets: Arc<dyn ResourceStore<Secret>>,
        metrics: Arc<ControllerMetrics>,
        config: &ControllerConfig,
    ) -> Self {
        let finalizer = Finalizer::default();
        let options = RunnerOptions {
            conflict_requeue: config.conflict_requeue,
            ready_message: "Provider is ready".to_string(),
            ..RunnerOptions::default()
        };
        Self {
            runner: Runner::new(KIND, Arc::clone(&providers), metrics).with_options(options),
            register: RegisterConditions::new(CONDITIONS),
            release: ReleaseWhenUnreferenced::new(
                finalizer.clone(),
                Arc::clone(&providers),
                cloud_resources,
                provider_reference,
                config.dependency_poll_interval,
            ),
            finalizer: EnsureFinalizer::new(finalizer, providers),
            validate: ValidateProvider::new(config.supported_providers.clone(), secrets),
        }
    }
}

#[async_trait]
impl Reconcile<Provider> for ProviderReconciler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn reconcile(&self, provider: Provider, cancel: &CancellationToken) -> RunResult {
        let steps: [&dyn Step<Provider>; 4] = [
            &self.register,
            &self.release,
            &self.finalizer,
            &self.validate,
        ];
        self.runner.run(provider, &steps, cancel).await
    }
}
