//! Key/value secrets: var files, file bundles, generated values and latent
//! files.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry, check_obj, sanitize_mount};
use crate::error::{ManifestError, Result};
use crate::planner::CompareScope;
use crate::vault::{TokenScope, VaultApi};

use super::resource::{
    BackendSpec, Resource, ResourceBase, delete_path, optional_str, read_path, unwrap_data,
    write_path,
};

const CUBBYHOLE: &str = "cubbyhole";

const ACADEMIC: &[&str] = &[
    "abstract", "academic", "adjunct", "algebraic", "analytic", "axiomatic", "canonical",
    "classical", "cognitive", "comparative", "critical", "deductive", "empirical", "formal",
    "historical", "inductive", "lexical", "linear", "logical", "material", "modal", "nominal",
    "numeric", "ordinal", "partial", "quantum", "rational", "semantic", "spectral", "tenured",
    "theoretical", "topical", "tutorial", "verbal",
];

const ANIMALS: &[&str] = &[
    "aardvark", "albatross", "alpaca", "badger", "beaver", "bison", "camel", "capybara",
    "cheetah", "condor", "coyote", "dingo", "dolphin", "falcon", "ferret", "gazelle", "gecko",
    "heron", "ibex", "jackal", "koala", "lemur", "lynx", "marmot", "narwhal", "ocelot", "otter",
    "panda", "pelican", "puffin", "quokka", "raccoon", "salamander", "tapir", "walrus", "wombat",
    "yak", "zebra",
];

/// An `academic-animal` word pair.
#[must_use]
pub fn random_words() -> String {
    let mut rng = rand::thread_rng();
    let academic = ACADEMIC.choose(&mut rng).copied().unwrap_or("academic");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("animal");
    format!("{academic}-{animal}")
}

/// How a generated key gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generator {
    /// A random v4 UUID.
    Uuid,
    /// A random word pair.
    Words,
    /// A fixed value from the manifest.
    Static(String),
}

impl Generator {
    fn parse(key: &Map<String, Value>) -> Result<Self> {
        match optional_str(key, "method").unwrap_or_default() {
            "uuid" => Ok(Self::Uuid),
            "words" => Ok(Self::Words),
            "static" => key
                .get("value")
                .map(|v| match v {
                    Value::String(s) => Self::Static(s.clone()),
                    other => Self::Static(other.to_string()),
                })
                .ok_or_else(|| ManifestError::data("Missing static value").into()),
            other => Err(ManifestError::data(format!(
                "Unexpected generated secret method {other}"
            ))
            .into()),
        }
    }

    fn generate(&self) -> String {
        match self {
            Self::Uuid => Uuid::new_v4().to_string(),
            Self::Words => random_words(),
            Self::Static(value) => value.clone(),
        }
    }
}

/// One declared key of a generated secret.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Key name.
    pub name: String,
    /// Value source.
    pub method: Generator,
    /// Whether an existing value is replaced.
    pub overwrite: bool,
}

/// Where a key/value secret's payload comes from.
#[derive(Debug)]
pub enum SecretSource {
    /// A YAML var file from the secrets directory.
    VarFile(String),
    /// Named local files, one key per file.
    Files(Vec<(String, String)>),
    /// Generated values. The generated map is computed once per fetch.
    Generated {
        /// Declared keys.
        keys: Vec<GeneratedKey>,
        /// Values chosen for this run.
        cache: OnceLock<Map<String, Value>>,
    },
}

/// A secret written into a key/value engine.
#[derive(Debug)]
pub struct GenericSecret {
    base: ResourceBase,
    mount: String,
    relative: String,
    kv_version: u8,
    source: SecretSource,
}

impl GenericSecret {
    fn new(obj: &Map<String, Value>, source: SecretSource) -> Result<Self> {
        let mount = sanitize_mount(optional_str(obj, "mount").unwrap_or_default());
        let relative = optional_str(obj, "path").unwrap_or_default().to_string();
        let kind = if mount == CUBBYHOLE { CUBBYHOLE } else { "kv" };
        let base = ResourceBase::new(format!("{mount}/{relative}"), obj)?
            .with_backend(BackendSpec::secret(mount.clone(), kind));
        Ok(Self {
            base,
            mount,
            relative,
            kv_version: 1,
            source,
        })
    }

    /// Builds a secret backed by a var file.
    ///
    /// # Errors
    ///
    /// Returns a data error if `path`, `mount` or `var_file` is missing.
    pub fn var_file(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(
            &[Field::One("path"), Field::One("mount"), Field::One("var_file")],
            "var file secret",
            obj,
        )?;
        let file = optional_str(obj, "var_file").unwrap_or_default().to_string();
        Ok(vec![Box::new(Self::new(obj, SecretSource::VarFile(file))?)])
    }

    /// Builds a secret holding the contents of local files.
    ///
    /// # Errors
    ///
    /// Returns a data error if a required field or a file's `name` or
    /// `source` is missing.
    pub fn files(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(
            &[Field::One("path"), Field::One("mount"), Field::One("files")],
            "files secret",
            obj,
        )?;
        let Some(Value::Array(entries)) = obj.get("files") else {
            return Err(ManifestError::validation("files must be a list").into());
        };

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry
                .as_object()
                .ok_or_else(|| ManifestError::validation("files entries must be maps"))?;
            check_obj(&[Field::One("source"), Field::One("name")], "files secret", entry)?;
            files.push((
                optional_str(entry, "name").unwrap_or_default().to_string(),
                optional_str(entry, "source").unwrap_or_default().to_string(),
            ));
        }

        Ok(vec![Box::new(Self::new(obj, SecretSource::Files(files))?)])
    }

    /// Builds a generated secret. The declaration lives under `generated`.
    ///
    /// # Errors
    ///
    /// Returns a data error for missing fields or an unknown method.
    pub fn generated(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        let generated = obj
            .get("generated")
            .and_then(Value::as_object)
            .ok_or_else(|| ManifestError::validation("generated must be a map"))?;
        check_entry(
            &[Field::One("mount"), Field::One("path")],
            &[Field::One("keys")],
            "generated secret",
            generated,
        )?;
        let declared = match generated.get("keys") {
            Some(Value::Array(declared)) => declared.as_slice(),
            None => &[],
            Some(_) => return Err(ManifestError::validation("generated keys must be a list").into()),
        };

        let mut keys = Vec::with_capacity(declared.len());
        for key in declared {
            let key = key
                .as_object()
                .ok_or_else(|| ManifestError::validation("generated keys must be maps"))?;
            check_obj(&[Field::One("name"), Field::One("method")], "generated secret entry", key)?;
            keys.push(GeneratedKey {
                name: optional_str(key, "name").unwrap_or_default().to_string(),
                method: Generator::parse(key)?,
                overwrite: key.get("overwrite").and_then(Value::as_bool).unwrap_or(false),
            });
        }

        let source = SecretSource::Generated {
            keys,
            cache: OnceLock::new(),
        };
        Ok(vec![Box::new(Self::new(generated, source)?)])
    }

    fn data_path(&self) -> String {
        if self.kv_version == 2 {
            format!("{}/data/{}", self.mount, self.relative)
        } else {
            self.path().to_string()
        }
    }

    fn metadata_path(&self) -> String {
        if self.kv_version == 2 {
            format!("{}/metadata/{}", self.mount, self.relative)
        } else {
            self.path().to_string()
        }
    }

    fn scoped<'a>(&self, client: &'a dyn VaultApi) -> Option<TokenScope<'a>> {
        (self.mount == CUBBYHOLE).then(|| TokenScope::original(client))
    }

    fn generate(&self, keys: &[GeneratedKey]) -> Map<String, Value> {
        let existing = self.base.existing.as_ref().and_then(Value::as_object);
        let mut secret = existing.cloned().unwrap_or_default();

        for key in keys {
            if !key.overwrite && existing.is_some_and(|e| e.contains_key(&key.name)) {
                debug!("Not overwriting {}/{}", self.path(), key.name);
                continue;
            }
            secret.insert(key.name.clone(), Value::String(key.method.generate()));
        }
        secret
    }
}

#[async_trait]
impl Resource for GenericSecret {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        match self.source {
            SecretSource::VarFile(_) => "Var File",
            SecretSource::Files(_) => "Files",
            SecretSource::Generated { .. } => "Generated",
        }
    }

    fn compare_scope(&self) -> CompareScope {
        CompareScope::Exact
    }

    fn secrets(&self) -> Vec<String> {
        match &self.source {
            SecretSource::VarFile(file) => vec![file.clone()],
            SecretSource::Files(files) => files.iter().map(|(_, source)| source.clone()).collect(),
            SecretSource::Generated { .. } => vec![],
        }
    }

    fn set_kv_version(&mut self, version: u8) {
        self.kv_version = version;
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        match &self.source {
            SecretSource::VarFile(file) => Ok(Value::Object(env.load_var_file(file)?)),
            SecretSource::Files(files) => {
                let mut payload = Map::new();
                for (name, source) in files {
                    let data = env.read_secret(source)?;
                    let value = match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(e) => STANDARD.encode(e.into_bytes()),
                    };
                    payload.insert(name.clone(), Value::String(value));
                }
                Ok(Value::Object(payload))
            }
            SecretSource::Generated { keys, cache } => Ok(Value::Object(
                cache.get_or_init(|| self.generate(keys)).clone(),
            )),
        }
    }

    async fn read(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<Option<Value>> {
        let _scope = self.scoped(client);
        let existing = read_path(client, &self.data_path()).await?.map(unwrap_data);
        if self.kv_version == 2 {
            return Ok(existing.map(unwrap_data));
        }
        Ok(existing)
    }

    async fn fetch(&mut self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let existing = self.read(client, env).await?;
        self.base.existing = existing;
        if let SecretSource::Generated { cache, .. } = &mut self.source {
            *cache = OnceLock::new();
        }
        Ok(())
    }

    async fn write(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let payload = self.desired(env)?;
        let payload = if self.kv_version == 2 {
            json!({ "data": payload })
        } else {
            payload
        };
        let _scope = self.scoped(client);
        write_path(client, &self.data_path(), &payload).await
    }

    async fn delete(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<()> {
        let _scope = self.scoped(client);
        delete_path(client, &self.metadata_path()).await
    }
}

/// A local secret file tracked only for freeze and thaw.
#[derive(Debug)]
pub struct Latent {
    base: ResourceBase,
}

impl Latent {
    /// Builds a latent file entry.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad `state` or `tags` field.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        let file = optional_str(obj, "latent_file").unwrap_or_default();
        Ok(vec![Box::new(Self {
            base: ResourceBase::new(file, obj)?,
        })])
    }
}

impl Resource for Latent {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "Latent File"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Null)
    }

    fn no_resource(&self) -> bool {
        true
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.base.path.clone()]
    }
}
