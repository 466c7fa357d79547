use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use organate_auth::{config::Config, create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化（JSON形式、環境変数でレベル制御）
    init_tracing();

    tracing::info!("organate-auth 起動中...");

    // 設定読み込み
    let config = Config::load().map_err(|e| {
        tracing::error!(error = ?e, "設定の読み込みに失敗");
        anyhow::anyhow!("Failed to load config: {}", e)
    })?;

    tracing::info!(host = %config.host, port = %config.port, "設定読み込み完了");

    // サーバーアドレスを先に構築（config が move される前に）
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            tracing::error!(error = ?e, "アドレスのパースに失敗");
            anyhow::anyhow!("Failed to parse address: {}", e)
        })?;

    // AppState 構築
    let state = AppState::new(config).map_err(|e| {
        tracing::error!(error = ?e, "AppState の構築に失敗");
        anyhow::anyhow!("Failed to create AppState: {}", e)
    })?;

    // Router 構築
    let app = create_router(state);

    // サーバー起動
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(error = ?e, addr = %addr, "ポートのバインドに失敗");
        anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
    })?;

    tracing::info!(addr = %addr, "サーバー起動");

    // 接続元アドレスはレート制限キーに使う
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| {
        tracing::error!(error = ?e, "サーバーエラー");
        anyhow::anyhow!("Server error: {}", e)
    })?;

    tracing::info!("サーバー終了");

    Ok(())
}

/// tracing の初期化（JSON形式）
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,organate_auth=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Graceful shutdown シグナル待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Ctrl+C ハンドラーのインストールに失敗");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "SIGTERM ハンドラーのインストールに失敗");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        }
    }
}
