//! 会话层错误类型

use emostream_transport::CredentialError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// 启动前获取令牌失败；会话保持 Idle，可以在修正后重新 `start()`
    #[error("Failed to obtain access token: {0}")]
    Credential(#[from] CredentialError),

    #[error("Session already started")]
    AlreadyStarted,

    /// 会话已进入终态
    #[error("Session already terminated")]
    Terminated,

    #[error("Missing session component: {0}")]
    MissingComponent(&'static str),

    #[error("Failed to spawn session worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Credential(CredentialError::MissingEnv("HUME_API_KEY".into()));
        assert_eq!(
            format!("{}", err),
            "Failed to obtain access token: Environment variable HUME_API_KEY is not set"
        );
        assert_eq!(
            format!("{}", SessionError::MissingComponent("frame_source")),
            "Missing session component: frame_source"
        );
    }
}
