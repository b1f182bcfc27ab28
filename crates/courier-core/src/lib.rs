//! courier-core
//!
//! Core building blocks for the Courier workflow dispatcher.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（operation, descriptor, trace, errors, events）
//! - **ports**: 抽象化レイヤー（QueueService, TraceContext, Clock, EventSink）
//! - **app**: アプリケーションロジック（builder, dispatch_client, engine, status）
//! - **impls**: 実装（InMemoryQueueService, CloudTasksHttpQueue, LocalTraceContext など）
//! - **config**: 実行設定（JSON ファイル）
//!
//! # フロー
//! 1. Operation をエンジンのキューに積む（add_operation）
//! 2. kick で先頭から順に TaskDispatchClient へ渡す
//! 3. クライアントが span を開き、traceparent 付きのタスク記述子を QueueService に送る
//! 4. 結果で Operation の状態を executed / failed に更新する

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
