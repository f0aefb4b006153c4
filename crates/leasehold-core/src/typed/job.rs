//! Job trait - アプリケーションが実装する仕事の単位
//!
//! # 学習ポイント
//! - `where Self: Sized` で object safety を保ったまま static メソッドを持つ
//! - デフォルト実装（type_tag = 型名、time_to_live = 1 時間）

use std::time::Duration;

use async_trait::async_trait;

use super::codec::CodecError;

/// Any application error returned from [`Job::execute`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(60 * 60);

/// Job は encode / decode / execute の 3 つの能力を持つ
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// #[async_trait]
/// impl Job for SendEmail {
///     fn encode(&self) -> Result<Vec<u8>, CodecError> {
///         encode_json(self)
///     }
///
///     fn decode(payload: &[u8]) -> Result<Self, CodecError> {
///         decode_json(payload)
///     }
///
///     async fn execute(&self) -> Result<(), BoxError> {
///         mailer::send(&self.to).await?;
///         Ok(())
///     }
/// }
/// ```
///
/// Execution is at-least-once: a job whose lease expires is run again, so
/// `execute` must tolerate duplicates.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Registry key. Defaults to the bare type name (`SendEmail`).
    fn type_tag() -> &'static str
    where
        Self: Sized,
    {
        short_type_name(std::any::type_name::<Self>())
    }

    /// How long a dequeued job may stay leased before it counts as abandoned.
    fn time_to_live(&self) -> Duration {
        DEFAULT_TIME_TO_LIVE
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    fn decode(payload: &[u8]) -> Result<Self, CodecError>
    where
        Self: Sized;

    async fn execute(&self) -> Result<(), BoxError>;
}

/// `a::b::Foo<c::Bar>` -> `Foo`
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }

        fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
            Ok(Noop)
        }

        async fn execute(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct Tagged;

    #[async_trait]
    impl Job for Tagged {
        fn type_tag() -> &'static str {
            "billing.charge.v1"
        }

        fn time_to_live(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }

        fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
            Ok(Tagged)
        }

        async fn execute(&self) -> Result<(), BoxError> {
            Err("always fails".into())
        }
    }

    #[test]
    fn default_tag_is_type_name() {
        assert_eq!(Noop::type_tag(), "Noop");
        assert_eq!(Noop.time_to_live(), DEFAULT_TIME_TO_LIVE);
    }

    #[test]
    fn overrides_are_respected() {
        assert_eq!(Tagged::type_tag(), "billing.charge.v1");
        assert_eq!(Tagged.time_to_live(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn jobs_are_usable_as_trait_objects() {
        let jobs: Vec<Box<dyn Job>> = vec![Box::new(Noop), Box::new(Tagged)];
        assert!(jobs[0].execute().await.is_ok());
        assert!(jobs[1].execute().await.is_err());
    }

    #[rstest]
    #[case("Noop", "Noop")]
    #[case("my_app::jobs::SendEmail", "SendEmail")]
    #[case("my_app::jobs::Wrapper<my_app::Inner>", "Wrapper")]
    fn short_type_name_strips_paths(#[case] full: &'static str, #[case] expected: &str) {
        assert_eq!(short_type_name(full), expected);
    }
}
