use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DynamicObject, Patch, PatchParams},
    core::GroupVersion,
    discovery::{self, Scope},
    Client,
};
use serde_json::Value;

/// Creates or updates generated objects. Application happens in the background.
pub trait ObjectApplier: Send + Sync + 'static {
    fn apply(&self, requester: String, object: Value);
}

/// Server-side applies generated objects, resolving their resource through discovery.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
    params: PatchParams,
}

// === impl KubeApplier ===

impl KubeApplier {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            params: PatchParams::apply(field_manager).force(),
        }
    }

    async fn server_side_apply(&self, object: Value) -> Result<()> {
        let obj: DynamicObject =
            serde_json::from_value(object.clone()).context("invalid object")?;
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| anyhow!("object must set apiVersion and kind"))?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("object must set metadata.name"))?;

        let gvk = types
            .api_version
            .parse::<GroupVersion>()?
            .with_kind(&types.kind);
        let (resource, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .with_context(|| format!("failed to discover {}", types.kind))?;

        let api = match caps.scope {
            Scope::Namespaced => {
                let ns = obj.metadata.namespace.as_deref().unwrap_or("default");
                Api::<DynamicObject>::namespaced_with(self.client.clone(), ns, &resource)
            }
            Scope::Cluster => Api::<DynamicObject>::all_with(self.client.clone(), &resource),
        };
        api.patch(name, &self.params, &Patch::Apply(&object))
            .await
            .with_context(|| format!("failed to apply {}/{name}", types.kind))?;
        Ok(())
    }
}

impl ObjectApplier for KubeApplier {
    fn apply(&self, requester: String, object: Value) {
        let applier = self.clone();
        tokio::spawn(async move {
            match applier.server_side_apply(object).await {
                Ok(()) => tracing::info!(%requester, "Applied generated object"),
                Err(error) => tracing::warn!(
                    %requester,
                    error = format_args!("{error:#}"),
                    "Failed to apply generated object"
                ),
            }
        });
    }
}
