//! sc-core: simple-contacts Core Library
//!
//! 設定の読み込みと共通エラー型を提供します。
//! パイプライン本体は `sc-contacts` にあります。

pub mod config;
pub mod error;

pub use config::{
    Config, DeniedPolicy, LogConfig, PermissionConfig, PipelineConfig, ResultOrder, StoreConfig,
};
pub use error::{Error, Result};
