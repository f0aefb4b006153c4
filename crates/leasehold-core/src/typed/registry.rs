//! JobRegistry - type_tag から factory を引く
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - クロージャも factory として登録できる（アプリの状態を注入したいとき）

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::codec::CodecError;
use super::job::Job;

/// Object-safe decode factory: payload bytes -> job.
pub trait DynFactory: Send + Sync {
    fn build(&self, payload: &[u8]) -> Result<Box<dyn Job>, CodecError>;
}

impl<F> DynFactory for F
where
    F: Fn(&[u8]) -> Result<Box<dyn Job>, CodecError> + Send + Sync,
{
    fn build(&self, payload: &[u8]) -> Result<Box<dyn Job>, CodecError> {
        self(payload)
    }
}

/// Type erasure: `J::decode` -> `DynFactory`.
struct TypedFactory<J> {
    _marker: PhantomData<fn() -> J>,
}

impl<J: Job> DynFactory for TypedFactory<J> {
    fn build(&self, payload: &[u8]) -> Result<Box<dyn Job>, CodecError> {
        let job = J::decode(payload)?;
        Ok(Box::new(job))
    }
}

/// JobRegistry は起動時に組み立て、実行時は読み取り専用
///
/// # 使用例
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register::<SendEmail>()?;
/// registry.register_factory("report", move |payload| {
///     let req = decode_json(payload)?;
///     Ok(Box::new(Report::new(req, db.clone())) as Box<dyn Job>)
/// })?;
/// ```
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, Arc<dyn DynFactory>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a job type is already registered under '{0}'")]
    AlreadyRegistered(String),
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `J` under `J::type_tag()`, decoding with `J::decode`.
    pub fn register<J: Job>(&mut self) -> Result<(), RegistryError> {
        self.insert(
            J::type_tag().to_string(),
            Arc::new(TypedFactory::<J> {
                _marker: PhantomData,
            }),
        )
    }

    /// Register an arbitrary factory under `type_tag`.
    pub fn register_factory<F>(
        &mut self,
        type_tag: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[u8]) -> Result<Box<dyn Job>, CodecError> + Send + Sync + 'static,
    {
        self.insert(type_tag.into(), Arc::new(factory))
    }

    fn insert(
        &mut self,
        type_tag: String,
        factory: Arc<dyn DynFactory>,
    ) -> Result<(), RegistryError> {
        if self.factories.contains_key(&type_tag) {
            return Err(RegistryError::AlreadyRegistered(type_tag));
        }
        self.factories.insert(type_tag, factory);
        Ok(())
    }

    pub fn factory(&self, type_tag: &str) -> Option<Arc<dyn DynFactory>> {
        self.factories.get(type_tag).cloned()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Registered tags, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::codec::{decode_json, encode_json};
    use crate::typed::job::BoxError;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize, Deserialize)]
    struct Resize {
        width: u32,
    }

    #[async_trait]
    impl Job for Resize {
        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            encode_json(self)
        }

        fn decode(payload: &[u8]) -> Result<Self, CodecError> {
            decode_json(payload)
        }

        async fn execute(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Archive {
        path: String,
    }

    #[async_trait]
    impl Job for Archive {
        fn type_tag() -> &'static str {
            "files.archive.v1"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            encode_json(self)
        }

        fn decode(payload: &[u8]) -> Result<Self, CodecError> {
            decode_json(payload)
        }

        async fn execute(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct Counting {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for Counting {
        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }

        fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
            Err(CodecError::DecodingFailed("needs a factory".into()))
        }

        async fn execute(&self) -> Result<(), BoxError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = JobRegistry::new();
        registry.register::<Resize>().unwrap();

        assert!(registry.contains("Resize"));
        assert!(registry.factory("Resize").is_some());
        assert!(registry.factory("Archive").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = JobRegistry::new();
        registry.register::<Resize>().unwrap();
        let result = registry.register::<Resize>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(tag)) if tag == "Resize"));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = JobRegistry::new();
        registry.register::<Resize>().unwrap();
        registry.register::<Archive>().unwrap();
        assert_eq!(
            registry.registered_types(),
            vec!["Resize".to_string(), "files.archive.v1".to_string()]
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn typed_factory_decodes_payload() {
        let mut registry = JobRegistry::new();
        registry.register::<Resize>().unwrap();
        let factory = registry.factory("Resize").unwrap();

        assert!(factory.build(br#"{"width":640}"#).is_ok());
        assert!(matches!(
            factory.build(br#"{"height":480}"#),
            Err(CodecError::DecodingFailed(_))
        ));
    }

    #[tokio::test]
    async fn closure_factory_injects_state() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        let shared = Arc::clone(&hits);
        registry
            .register_factory("counting", move |_payload: &[u8]| {
                Ok(Box::new(Counting {
                    hits: Arc::clone(&shared),
                }) as Box<dyn Job>)
            })
            .unwrap();

        let job = registry.factory("counting").unwrap().build(b"").unwrap();
        job.execute().await.unwrap();
        job.execute().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
