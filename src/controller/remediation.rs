//! Remediation CR management.
//!
//! Resolves remediation templates, instantiates remediation CRs from their
//! embedded spec, and handles the CR lifecycle the engine owns: creation
//! with owner references, timeout and alert annotations, and deletion once
//! a node recovers.
//!
//! Two addressing modes exist. Same-kind templates name the CR after the
//! node. Multi-kind templates (marked by the multiple-templates-support
//! annotation) use a generated name and carry the node and template names
//! as annotations instead.

use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::NodeHealthCheck;

/// RFC3339 stamp set when escalation declares a step failed.
pub const TIMED_OUT_ANNOTATION: &str = "remediation.medik8s.io/nhc-timed-out";
/// Flag set on CRs that have existed past the alert timeout.
pub const OLD_REMEDIATION_CR_ANNOTATION: &str = "old-remediation-cr";
/// Value written to the alert annotation.
pub const OLD_REMEDIATION_CR_FLAG: &str = "flagon";
/// Node name carried on multi-kind CRs.
pub const NODE_NAME_ANNOTATION: &str = "remediation.medik8s.io/node-name";
/// Template name carried on multi-kind CRs.
pub const TEMPLATE_NAME_ANNOTATION: &str = "template-name";
/// Marks a template whose CRs use generated names.
pub const MULTIPLE_TEMPLATES_SUPPORT_ANNOTATION: &str =
    "remediation.medik8s.io/multiple-templates-support";
/// Node annotation linking to the owning Machine ("<namespace>/<name>").
pub const MACHINE_ANNOTATION: &str = "machine.openshift.io/machine";

/// Suffix stripped from the template kind to derive the CR kind.
pub const TEMPLATE_SUFFIX: &str = "Template";

/// Template kinds that must live in the machine-management namespace.
const MACHINE_NAMESPACE_TEMPLATE_KINDS: &[&str] = &["Metal3RemediationTemplate"];

/// CR status condition reported by remediators on completion.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";
/// CR status condition announcing the node will be permanently removed.
pub const CONDITION_PERMANENT_NODE_DELETION_EXPECTED: &str = "PermanentNodeDeletionExpected";

/// A remediation template resolved to its usable parts.
#[derive(Clone, Debug)]
pub struct ResolvedTemplate {
    /// Template object name.
    pub name: String,
    /// Namespace the template (and its CRs) live in.
    pub namespace: String,
    /// API resource of the CRs instantiated from this template.
    pub cr_resource: ApiResource,
    /// Deep copy of the template's `spec.template.spec`.
    pub inner_spec: serde_json::Value,
    /// Whether CRs use generated names plus lookup annotations.
    pub multi_kind: bool,
}

impl ResolvedTemplate {
    /// The API for CRs of this template.
    pub fn cr_api(&self, client: Client) -> Api<DynamicObject> {
        Api::namespaced_with(client, &self.namespace, &self.cr_resource)
    }
}

/// Outcome of ensuring a remediation CR exists for a node.
#[derive(Clone, Debug)]
pub enum EnsureOutcome {
    /// CR was created by this reconcile.
    Created(DynamicObject),
    /// CR already existed and is owned by this NHC.
    Exists(DynamicObject),
    /// A CR with the target identity exists but belongs to another owner.
    OwnedByOther,
}

/// Remediation CR manager bound to one NodeHealthCheck.
pub struct RemediationCrManager {
    client: Client,
    machine_api_namespace: String,
}

impl RemediationCrManager {
    pub fn new(client: Client, machine_api_namespace: &str) -> Self {
        Self {
            client,
            machine_api_namespace: machine_api_namespace.to_string(),
        }
    }

    /// Resolve a template reference into its CR addressing information.
    pub async fn resolve_template(&self, template_ref: &ObjectReference) -> Result<ResolvedTemplate> {
        let kind = template_ref
            .kind
            .clone()
            .ok_or_else(|| Error::TemplateNotFound("template reference without kind".to_string()))?;
        let api_version = template_ref.api_version.clone().ok_or_else(|| {
            Error::TemplateNotFound("template reference without apiVersion".to_string())
        })?;
        let namespace = template_ref.namespace.clone().ok_or_else(|| {
            Error::TemplateNotFound(format!("template reference {} without namespace", kind))
        })?;
        let name = template_ref
            .name
            .clone()
            .ok_or_else(|| Error::TemplateNotFound("template reference without name".to_string()))?;

        if MACHINE_NAMESPACE_TEMPLATE_KINDS.contains(&kind.as_str())
            && namespace != self.machine_api_namespace
        {
            return Err(Error::TemplateInvalid(format!(
                "{} {}/{} must live in the {} namespace",
                kind, namespace, name, self.machine_api_namespace
            )));
        }

        let (group, version) = split_api_version(&api_version);
        let template_resource =
            ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &kind));
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &namespace, &template_resource);

        let template = match api.get_opt(&name).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                return Err(Error::TemplateNotFound(format!(
                    "{} {}/{}",
                    kind, namespace, name
                )));
            }
            // An unregistered template kind surfaces as 404 on the list path
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::TemplateNotFound(format!(
                    "{} {}/{}",
                    kind, namespace, name
                )));
            }
            Err(e) => return Err(Error::Kube(e)),
        };

        let inner_spec = template.data["spec"]["template"]
            .get("spec")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        if !template.data["spec"].is_object() || !template.data["spec"]["template"].is_object() {
            return Err(Error::TemplateInvalid(format!(
                "{} {}/{} has no spec.template",
                kind, namespace, name
            )));
        }

        let multi_kind = template
            .annotations()
            .get(MULTIPLE_TEMPLATES_SUPPORT_ANNOTATION)
            .is_some_and(|v| v == "true");

        let cr_kind = kind.strip_suffix(TEMPLATE_SUFFIX).ok_or_else(|| {
            Error::TemplateInvalid(format!("template kind {} has no Template suffix", kind))
        })?;
        let cr_resource =
            ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, cr_kind));

        Ok(ResolvedTemplate {
            name,
            namespace,
            cr_resource,
            inner_spec,
            multi_kind,
        })
    }

    /// Find the CR for a node under this template, using the addressing
    /// mode the template declares.
    pub async fn find_cr(
        &self,
        template: &ResolvedTemplate,
        node_name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = template.cr_api(self.client.clone());
        if !template.multi_kind {
            return Ok(api.get_opt(node_name).await?);
        }
        let crs = api.list(&ListParams::default()).await?;
        Ok(crs.items.into_iter().find(|cr| {
            cr.annotations().get(NODE_NAME_ANNOTATION).map(String::as_str) == Some(node_name)
                && cr
                    .annotations()
                    .get(TEMPLATE_NAME_ANNOTATION)
                    .map(String::as_str)
                    == Some(template.name.as_str())
        }))
    }

    /// Ensure the node's CR exists for this template, creating it when
    /// missing. A pre-existing CR with a foreign owner reference is left
    /// alone and reported as such.
    pub async fn ensure_cr(
        &self,
        nhc: &NodeHealthCheck,
        node: &Node,
        template: &ResolvedTemplate,
    ) -> Result<EnsureOutcome> {
        if let Some(existing) = self.find_cr(template, &node.name_any()).await? {
            if is_owned_by(&existing, nhc) {
                return Ok(EnsureOutcome::Exists(existing));
            }
            debug!(
                node = %node.name_any(),
                kind = %template.cr_resource.kind,
                "Remediation CR exists with foreign owner"
            );
            return Ok(EnsureOutcome::OwnedByOther);
        }

        let machine_owner = self.machine_owner_reference(node, template).await;
        let cr = build_remediation_cr(nhc, node, template, machine_owner);
        let api = template.cr_api(self.client.clone());
        match api.create(&PostParams::default(), &cr).await {
            Ok(created) => {
                info!(
                    node = %node.name_any(),
                    kind = %template.cr_resource.kind,
                    name = %created.name_any(),
                    "Created remediation CR"
                );
                Ok(EnsureOutcome::Created(created))
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                // Lost the race; re-read and re-check ownership
                match self.find_cr(template, &node.name_any()).await? {
                    Some(existing) if is_owned_by(&existing, nhc) => {
                        Ok(EnsureOutcome::Exists(existing))
                    }
                    _ => Ok(EnsureOutcome::OwnedByOther),
                }
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    /// Delete a CR owned by this NHC. Finalizers set by the remediator mean
    /// the object may linger with a deletion timestamp.
    pub async fn delete_cr(&self, template: &ResolvedTemplate, cr: &DynamicObject) -> Result<()> {
        let api = template.cr_api(self.client.clone());
        match api.delete(&cr.name_any(), &DeleteParams::default()).await {
            Ok(_) => {
                info!(name = %cr.name_any(), kind = %template.cr_resource.kind, "Deleted remediation CR");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    /// Stamp the timeout annotation on a CR.
    pub async fn annotate_timed_out(
        &self,
        template: &ResolvedTemplate,
        cr: &DynamicObject,
        now: Timestamp,
    ) -> Result<()> {
        self.annotate(template, cr, TIMED_OUT_ANNOTATION, &now.to_string())
            .await
    }

    /// Stamp the old-CR alert annotation.
    pub async fn annotate_old_cr(
        &self,
        template: &ResolvedTemplate,
        cr: &DynamicObject,
    ) -> Result<()> {
        self.annotate(template, cr, OLD_REMEDIATION_CR_ANNOTATION, OLD_REMEDIATION_CR_FLAG)
            .await
    }

    async fn annotate(
        &self,
        template: &ResolvedTemplate,
        cr: &DynamicObject,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let api = template.cr_api(self.client.clone());
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { key: value }
            }
        });
        api.patch(
            &cr.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        debug!(name = %cr.name_any(), annotation = %key, "Annotated remediation CR");
        Ok(())
    }

    /// All CRs of this template owned by the NHC.
    pub async fn list_owned_crs(
        &self,
        nhc: &NodeHealthCheck,
        template: &ResolvedTemplate,
    ) -> Result<Vec<DynamicObject>> {
        let api = template.cr_api(self.client.clone());
        let crs = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            // The CRD may not exist yet; nothing owned then
            Err(kube::Error::Api(e)) if e.code == 404 => Vec::new(),
            Err(e) => return Err(Error::Kube(e)),
        };
        Ok(crs.into_iter().filter(|cr| is_owned_by(cr, nhc)).collect())
    }

    /// Machine owner reference for nodes managed by the machine API, when
    /// the template lives in the machine-management namespace.
    async fn machine_owner_reference(
        &self,
        node: &Node,
        template: &ResolvedTemplate,
    ) -> Option<OwnerReference> {
        if template.namespace != self.machine_api_namespace {
            return None;
        }
        let machine = node.annotations().get(MACHINE_ANNOTATION)?;
        let (machine_ns, machine_name) = machine.split_once('/')?;

        let machine_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "machine.openshift.io",
            "v1beta1",
            "Machine",
        ));
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), machine_ns, &machine_resource);
        match api.get_opt(machine_name).await {
            Ok(Some(machine)) => Some(OwnerReference {
                api_version: "machine.openshift.io/v1beta1".to_string(),
                kind: "Machine".to_string(),
                name: machine.name_any(),
                uid: machine.uid().unwrap_or_default(),
                controller: Some(false),
                block_owner_deletion: None,
            }),
            Ok(None) => {
                warn!(node = %node.name_any(), machine = %machine, "Machine annotation points to a missing Machine");
                None
            }
            Err(e) => {
                warn!(node = %node.name_any(), error = %e, "Failed to read Machine for owner reference");
                None
            }
        }
    }
}

/// Build the remediation CR for a node from a resolved template.
pub fn build_remediation_cr(
    nhc: &NodeHealthCheck,
    node: &Node,
    template: &ResolvedTemplate,
    machine_owner: Option<OwnerReference>,
) -> DynamicObject {
    let node_name = node.name_any();
    let mut owner_references = vec![nhc_owner_reference(nhc)];
    owner_references.extend(machine_owner);

    let mut metadata = ObjectMeta {
        namespace: Some(template.namespace.clone()),
        owner_references: Some(owner_references),
        ..Default::default()
    };
    if template.multi_kind {
        metadata.generate_name = Some(format!("{}-", node_name));
        metadata.annotations = Some(
            [
                (NODE_NAME_ANNOTATION.to_string(), node_name),
                (TEMPLATE_NAME_ANNOTATION.to_string(), template.name.clone()),
            ]
            .into(),
        );
    } else {
        metadata.name = Some(node_name);
    }

    let mut cr = DynamicObject::new("", &template.cr_resource);
    cr.metadata = metadata;
    // Deep copy: each CR owns its spec body
    cr.data = serde_json::json!({ "spec": template.inner_spec.clone() });
    cr
}

/// Non-controller owner reference pointing back to the NHC.
pub fn nhc_owner_reference(nhc: &NodeHealthCheck) -> OwnerReference {
    OwnerReference {
        api_version: NodeHealthCheck::api_version(&()).into_owned(),
        kind: NodeHealthCheck::kind(&()).into_owned(),
        name: nhc.name_any(),
        uid: nhc.uid().unwrap_or_default(),
        controller: Some(false),
        block_owner_deletion: None,
    }
}

/// Whether the CR's owner references include this NHC (by name, and by UID
/// when both sides carry one).
pub fn is_owned_by(cr: &DynamicObject, nhc: &NodeHealthCheck) -> bool {
    let nhc_uid = nhc.uid();
    cr.owner_references().iter().any(|owner| {
        owner.kind == NodeHealthCheck::kind(&()).as_ref()
            && owner.name == nhc.name_any()
            && match (&nhc_uid, owner.uid.is_empty()) {
                (Some(uid), false) => owner.uid == *uid,
                _ => true,
            }
    })
}

/// The node a CR remediates: its name for same-kind CRs, or the node-name
/// annotation for multi-kind ones.
pub fn cr_node_name(cr: &DynamicObject, multi_kind: bool) -> Option<String> {
    if multi_kind {
        cr.annotations().get(NODE_NAME_ANNOTATION).cloned()
    } else {
        cr.metadata.name.clone()
    }
}

/// Read the status of a named condition from a remediation CR.
pub fn cr_condition_status(cr: &DynamicObject, condition_type: &str) -> Option<String> {
    cr.data["status"]["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"] == condition_type)?["status"]
        .as_str()
        .map(str::to_string)
}

/// Whether the remediator reported the step stopped progressing.
pub fn remediation_stopped_progressing(cr: &DynamicObject) -> bool {
    cr_condition_status(cr, CONDITION_SUCCEEDED).as_deref() == Some("False")
}

/// Whether the CR announces permanent node deletion after success.
pub fn permanent_node_deletion_expected(cr: &DynamicObject) -> bool {
    cr_condition_status(cr, CONDITION_SUCCEEDED).as_deref() == Some("True")
        && cr_condition_status(cr, CONDITION_PERMANENT_NODE_DELETION_EXPECTED).as_deref()
            == Some("True")
}

/// Whether the CR is old enough for the alert annotation and does not
/// carry it yet.
pub fn needs_old_cr_alert(
    cr: &DynamicObject,
    now: Timestamp,
    alert_timeout: jiff::SignedDuration,
) -> bool {
    if cr
        .annotations()
        .get(OLD_REMEDIATION_CR_ANNOTATION)
        .is_some()
    {
        return false;
    }
    let Some(created) = cr.creation_timestamp() else {
        return false;
    };
    now.duration_since(created.0) > alert_timeout
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
