//! Start-up seeding: the default namespaces and an optional manifest of
//! namespaces and quota profiles.

use anyhow::Context;
use pkg_constants::state::SEED_NAMESPACES;
use pkg_state::Registry;
use pkg_types::namespace::Namespace;
use pkg_types::quota::{QuotaProfile, QuotaProfileSpec};
use pkg_types::resource::Resource;
use pkg_types::validate::{validate_label_key, validate_label_value, validate_name};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum Manifest {
    Namespace(NamespaceManifest),
    QuotaProfile(QuotaProfileManifest),
}

#[derive(Debug, Deserialize)]
struct NamespaceManifest {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QuotaProfileManifest {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    spec: QuotaProfileSpec,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Manifest {
    fn into_object(self) -> anyhow::Result<Object> {
        match self {
            Manifest::Namespace(m) => {
                validate_name(&m.name)?;
                for (key, value) in &m.labels {
                    validate_label_key(key)?;
                    validate_label_value(value)?;
                }
                let mut ns = Namespace::new(m.name);
                ns.labels = m.labels;
                Ok(Object::Namespace(ns))
            }
            Manifest::QuotaProfile(m) => {
                validate_name(&m.namespace)?;
                validate_name(&m.name)?;
                Ok(Object::QuotaProfile(QuotaProfile::new(
                    m.namespace,
                    m.name,
                    m.spec,
                )))
            }
        }
    }
}

#[derive(Debug)]
enum Object {
    Namespace(Namespace),
    QuotaProfile(QuotaProfile),
}

/// Parse a multi-document manifest. Empty documents are ignored.
fn parse_manifest(content: &str) -> anyhow::Result<Vec<Object>> {
    let mut objects = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let manifest = Option::<Manifest>::deserialize(document)
            .with_context(|| format!("manifest document {}", i + 1))?;
        if let Some(manifest) = manifest {
            objects.push(
                manifest
                    .into_object()
                    .with_context(|| format!("manifest document {}", i + 1))?,
            );
        }
    }
    Ok(objects)
}

/// Create `obj` unless an object with its key already exists.
/// Returns whether it was created.
async fn create_if_absent<R: Resource>(registry: &Registry, obj: &R) -> anyhow::Result<bool> {
    match registry.create(obj).await {
        Ok(_) => {
            info!("Seeded {} {}", R::KIND, obj.key());
            Ok(true)
        }
        Err(e) if e.is_conflict() => {
            debug!("{} {} already present", R::KIND, obj.key());
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn seed_namespaces(registry: &Registry) -> anyhow::Result<()> {
    for name in SEED_NAMESPACES {
        create_if_absent(registry, &Namespace::new(name)).await?;
    }
    Ok(())
}

/// Load the manifest at `path` into the store. Returns the number of objects
/// created; objects that already exist are left untouched.
pub async fn load_manifest(registry: &Registry, path: &str) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed manifest {path}"))?;
    apply(registry, parse_manifest(&content)?).await
}

async fn apply(registry: &Registry, objects: Vec<Object>) -> anyhow::Result<usize> {
    let mut created = 0;
    for object in objects {
        let fresh = match &object {
            Object::Namespace(ns) => create_if_absent(registry, ns).await?,
            Object::QuotaProfile(p) => create_if_absent(registry, p).await?,
        };
        if fresh {
            created += 1;
        }
    }
    Ok(created)
}
