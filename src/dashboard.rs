use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::{
    config::Settings,
    fetcher::{Fetcher, RefreshOutcome, Transport},
    market::AssetId,
    view::{self, parse_amount},
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(25);

pub struct DashboardState<T> {
    pub settings: Settings,
    pub fetcher: Arc<Fetcher<T>>,
}

impl<T> Clone for DashboardState<T> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

pub fn router<T: Transport + 'static>(state: DashboardState<T>) -> Router {
    Router::new()
        .route("/", get(index::<T>))
        .route("/api/view", get(api_view::<T>))
        .route("/api/convert", get(api_convert::<T>))
        .route("/api/select", post(api_select::<T>))
        .route("/api/refresh", post(api_refresh::<T>))
        .route("/api/wait", get(api_wait::<T>))
        .route("/api/health", get(api_health::<T>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve_dashboard<T: Transport + 'static>(
    settings: Settings,
    fetcher: Arc<Fetcher<T>>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .with_context(|| {
            format!(
                "dashboard addr {}:{}",
                settings.dashboard_host, settings.dashboard_port
            )
        })?;

    let app = router(DashboardState { settings, fetcher });

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index<T: Transport + 'static>(State(st): State<DashboardState<T>>) -> impl IntoResponse {
    Html(render_index_html(st.settings.refresh_interval_secs))
}

#[derive(Deserialize)]
struct AmountQ {
    amount: Option<String>,
}

#[derive(Deserialize)]
struct ConvertQ {
    amount: Option<String>,
    asset: Option<String>,
}

#[derive(Deserialize)]
struct SelectReq {
    asset: String,
    amount: Option<String>,
}

fn amount_of(raw: Option<&str>) -> f64 {
    raw.map(parse_amount).unwrap_or(0.0)
}

async fn api_view<T: Transport + 'static>(
    State(st): State<DashboardState<T>>,
    Query(q): Query<AmountQ>,
) -> impl IntoResponse {
    let amount = amount_of(q.amount.as_deref());
    let vm = st.fetcher.state().read(|s| view::render(s, amount));
    Json(vm)
}

async fn api_convert<T: Transport + 'static>(
    State(st): State<DashboardState<T>>,
    Query(q): Query<ConvertQ>,
) -> impl IntoResponse {
    let amount = amount_of(q.amount.as_deref());
    let state = st.fetcher.state();
    let asset = match q.asset.as_deref() {
        None => state.read(|s| s.selected),
        Some(raw) => match AssetId::parse(raw) {
            Some(id) => id,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"ok": false, "error": format!("unknown asset {raw:?}")})),
                )
                    .into_response()
            }
        },
    };
    Json(state.read(|s| view::conversion(s, asset, amount))).into_response()
}

async fn api_select<T: Transport + 'static>(
    State(st): State<DashboardState<T>>,
    Json(req): Json<SelectReq>,
) -> impl IntoResponse {
    let state = st.fetcher.state();
    let id = match state.select(&req.asset) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"ok": false, "error": e.to_string()})),
            )
                .into_response()
        }
    };
    log::debug!("dashboard.select asset={}", id);
    let amount = amount_of(req.amount.as_deref());
    Json(state.read(|s| view::render(s, amount))).into_response()
}

async fn api_refresh<T: Transport + 'static>(State(st): State<DashboardState<T>>) -> impl IntoResponse {
    let outcome = st.fetcher.refresh().await;
    Json(serde_json::json!({
        "ok": true,
        "ran": outcome != RefreshOutcome::Skipped,
        "outcome": outcome,
    }))
}

#[derive(Deserialize)]
struct WaitQ {
    since: Option<u64>,
}

/// Long-poll: returns once the state revision moves past `since`, or after
/// `WAIT_TIMEOUT` with the unchanged revision.
async fn api_wait<T: Transport + 'static>(
    State(st): State<DashboardState<T>>,
    Query(q): Query<WaitQ>,
) -> impl IntoResponse {
    let mut rx = st.fetcher.state().subscribe();
    let since = q.since.unwrap_or_else(|| *rx.borrow());
    match tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|r| *r > since)).await {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => log::debug!("dashboard.wait_closed since={}", since),
        Err(_) => log::debug!("dashboard.wait_timeout since={} after_secs={}", since, WAIT_TIMEOUT.as_secs()),
    }
    let revision = *rx.borrow();
    Json(serde_json::json!({ "revision": revision }))
}

async fn api_health<T: Transport + 'static>(State(st): State<DashboardState<T>>) -> impl IntoResponse {
    let state = st.fetcher.state();
    let (using_fallback, last_updated) =
        state.read(|s| (s.using_fallback, s.last_updated.map(|t| t.to_rfc3339())));
    Json(serde_json::json!({
        "ts": chrono::Local::now().to_rfc3339(),
        "in_flight": state.in_flight(),
        "using_fallback": using_fallback,
        "last_updated": last_updated,
        "revision": state.revision(),
        "routes": st.settings.routes.len(),
    }))
}

fn render_index_html(refresh_secs: u64) -> String {
    // Single-file UI (no build step). All numbers come preformatted from /api/view.
    format!(
        r#"<!doctype html>
 <html lang="en">
   <head>
     <meta charset="utf-8" />
     <meta name="viewport" content="width=device-width, initial-scale=1" />
     <title>Pricewatch • Crypto/NGN</title>
     <style>
       :root {{
         --bg: #0b1220;
         --panel: rgba(255,255,255,0.06);
         --stroke: rgba(255,255,255,0.12);
         --text: rgba(255,255,255,0.92);
         --muted: rgba(255,255,255,0.65);
         --good: #33d17a;
         --brand: #7c5cff;
       }}
       * {{ box-sizing: border-box; }}
       body {{ margin: 0; font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial; color: var(--text); background: var(--bg); }}
       .wrap {{ max-width: 960px; margin: 0 auto; padding: 22px 18px 42px; }}
       .warn {{ background:#fff3cd; color:#856404; padding:10px; text-align:center; font-size:12px; border-bottom:1px solid #ffeeba; display:none; }}
       .topbar {{ display:flex; align-items:center; justify-content:space-between; gap:12px; }}
       .hero {{ display:flex; gap:14px; color: var(--muted); font-size: 13px; }}
       .hero b {{ color: var(--text); }}
       .grid {{ display:grid; gap:14px; margin-top:14px; grid-template-columns: repeat(3, 1fr); }}
       .card {{ border:1px solid var(--stroke); border-radius:16px; background: var(--panel); padding: 14px; }}
       .market-icon {{ font-size: 22px; }}
       .market-pair, .small {{ color: var(--muted); font-size: 12px; }}
       .market-price {{ font-size: 20px; font-weight: 800; margin-top: 8px; }}
       .market-change {{ color: var(--good); font-size: 12px; margin-top: 4px; }}
       .calc {{ margin-top: 14px; }}
       .opts {{ display:flex; gap:8px; margin: 10px 0; }}
       .btn {{ cursor:pointer; padding:8px 10px; border-radius:10px; border:1px solid var(--stroke); background: rgba(255,255,255,0.05); color: var(--text); font-weight:700; font-size:12px; }}
       .btn.active {{ border-color: var(--brand); }}
       input {{ width:100%; padding:10px; border-radius:10px; border:1px solid var(--stroke); background: rgba(0,0,0,0.2); color: var(--text); font-size: 16px; }}
       .result {{ font-size: 22px; font-weight: 850; margin-top: 10px; }}
     </style>
   </head>
   <body>
     <div class="warn" id="demo-warning"></div>
     <div class="wrap">
       <div class="topbar">
         <div>
           <div style="font-weight:800">Pricewatch</div>
           <div class="small" id="lastUpdated">Waiting for first update…</div>
         </div>
         <div class="hero">
           <span>BTC <b id="heroBtcPrice">₦0.00</b></span>
           <span>ETH <b id="heroEthPrice">₦0.00</b></span>
           <span>USDT <b id="heroUsdtPrice">₦0.00</b></span>
         </div>
         <button class="btn" id="refreshBtn">↻ Refresh Data</button>
       </div>
       <div class="grid" id="marketGrid"></div>
       <div class="card calc">
         <div class="small">Convert NGN</div>
         <div class="opts">
           <button class="btn crypto-option" data-crypto="btc">BTC</button>
           <button class="btn crypto-option" data-crypto="eth">ETH</button>
           <button class="btn crypto-option" data-crypto="usdt">USDT</button>
         </div>
         <input id="nairaInput" inputmode="decimal" placeholder="Amount in ₦" />
         <div class="small" id="currentRate" style="margin-top:8px"></div>
         <div class="result"><span id="cryptoResult">0.00000000</span> <span id="resultCurrency"></span></div>
       </div>
       <div class="small" style="margin-top:14px">Auto-refresh every {refresh_secs}s.</div>
     </div>
     <script>
       const $ = (id) => document.getElementById(id);
       const amount = () => encodeURIComponent($("nairaInput").value || "");

       function paint(v) {{
         $("marketGrid").innerHTML = v.cards.map(c => `
           <div class="card">
             <div class="market-icon">${{c.glyph}}</div>
             <div>${{c.name}}</div>
             <div class="market-pair">${{c.pair}}</div>
             <div class="market-price">${{c.price}}</div>
             <div class="market-change">● Live Price</div>
           </div>`).join("");
         $("heroBtcPrice").textContent = v.hero.btc;
         $("heroEthPrice").textContent = v.hero.eth;
         $("heroUsdtPrice").textContent = v.hero.usdt;
         $("currentRate").textContent = v.rate;
         $("cryptoResult").textContent = v.conversion.result;
         $("resultCurrency").textContent = v.conversion.currency;
         if (v.last_updated) $("lastUpdated").textContent = v.last_updated;
         $("refreshBtn").textContent = v.refresh_label;
         const w = $("demo-warning");
         w.style.display = v.banner ? "block" : "none";
         w.textContent = v.banner ? "⚠️ " + v.banner : "";
         document.querySelectorAll(".crypto-option").forEach(o =>
           o.classList.toggle("active", o.dataset.crypto === v.selected));
       }}

       async function load() {{
         const r = await fetch(`/api/view?amount=${{amount()}}`, {{ cache: "no-store" }});
         if (r.ok) paint(await r.json());
       }}

       $("refreshBtn").addEventListener("click", async () => {{
         $("refreshBtn").textContent = "Updating...";
         await fetch("/api/refresh", {{ method: "POST" }});
         await load();
       }});
       $("nairaInput").addEventListener("input", load);
       document.querySelectorAll(".crypto-option").forEach(o =>
         o.addEventListener("click", async () => {{
           const r = await fetch("/api/select", {{
             method: "POST",
             headers: {{ "Content-Type": "application/json" }},
             body: JSON.stringify({{ asset: o.dataset.crypto, amount: $("nairaInput").value }}),
           }});
           if (r.ok) paint(await r.json());
         }}));

       let rev = 0;
       async function watch() {{
         for (;;) {{
           try {{
             const r = await fetch(`/api/wait?since=${{rev}}`, {{ cache: "no-store" }});
             const j = await r.json();
             if (j.revision !== rev) {{
               rev = j.revision;
               await load();
             }}
           }} catch (e) {{
             await new Promise(res => setTimeout(res, 3000));
           }}
         }}
       }}

       load();
       watch();
     </script>
   </body>
 </html>"#,
        refresh_secs = refresh_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, Route};
    use crate::state::SharedState;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    struct Counting {
        calls: Arc<Mutex<usize>>,
    }

    impl Transport for Counting {
        async fn get_json(&self, _url: &str) -> Result<JsonValue, FetchError> {
            *self.calls.lock() += 1;
            Ok(json!({ "data": {
                "btcngn": { "ticker": { "last": "162500000.0" } },
                "ethngn": { "ticker": { "last": "4500200.0" } },
                "usdtngn": { "ticker": { "last": "1680.50" } }
            }}))
        }
    }

    fn app() -> (Router, SharedState, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let st = SharedState::new(AssetId::Btc);
        let fetcher = Arc::new(Fetcher::new(
            Counting { calls: calls.clone() },
            vec![Route::new("direct")],
            "https://example.com/tickers".to_string(),
            st.clone(),
        ));
        let r = router(DashboardState {
            settings: Settings::default(),
            fetcher,
        });
        (r, st, calls)
    }

    async fn body_json(resp: axum::response::Response) -> JsonValue {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn index_serves_widget() {
        let (app, _, _) = app();
        let resp = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("id=\"nairaInput\""));
        assert!(html.contains("Auto-refresh every 60s."));
    }

    #[tokio::test]
    async fn refresh_then_view() {
        let (app, _, calls) = app();

        let resp = app.clone().oneshot(post_json("/api/refresh", json!({}))).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["ran"], true);
        assert_eq!(v["outcome"]["kind"], "live");
        assert_eq!(v["outcome"]["route"], 1);
        assert_eq!(*calls.lock(), 1);

        let resp = app.oneshot(get_req("/api/view?amount=50000")).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["rate"], "1 BTC = ₦162,500,000.00");
        assert_eq!(v["conversion"]["result"], "0.00030769");
        assert_eq!(v["hero"]["eth"], "₦4,500,200.00");
        assert!(v["banner"].is_null());
        assert!(v["last_updated"].as_str().unwrap().starts_with("Last updated: "));
    }

    #[tokio::test]
    async fn refresh_is_skipped_while_in_flight() {
        let (app, st, calls) = app();
        let _held = st.try_begin_fetch().unwrap();

        let resp = app.oneshot(post_json("/api/refresh", json!({}))).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["ran"], false);
        assert_eq!(v["outcome"]["kind"], "skipped");
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn select_switches_rate_without_fetching() {
        let (app, st, calls) = app();
        app.clone().oneshot(post_json("/api/refresh", json!({}))).await.unwrap();
        assert_eq!(*calls.lock(), 1);

        let resp = app
            .clone()
            .oneshot(post_json("/api/select", json!({ "asset": "usdt", "amount": "1680.5" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["selected"], "usdt");
        assert_eq!(v["rate"], "1 USDT = ₦1,680.50");
        assert_eq!(v["conversion"]["result"], "1.00000000");
        assert_eq!(*calls.lock(), 1);
        assert_eq!(st.snapshot().prices.price(AssetId::Btc), 162_500_000.0);

        let resp = app
            .oneshot(post_json("/api/select", json!({ "asset": "doge" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(st.snapshot().selected, AssetId::Usdt);
    }

    #[tokio::test]
    async fn convert_coerces_bad_input() {
        let (app, _, _) = app();
        app.clone().oneshot(post_json("/api/refresh", json!({}))).await.unwrap();

        let resp = app
            .clone()
            .oneshot(get_req("/api/convert?amount=abc&asset=eth"))
            .await
            .unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["result"], "0.00000000");
        assert_eq!(v["currency"], "ETH");

        let resp = app
            .clone()
            .oneshot(get_req("/api/convert?amount=4500200&asset=eth"))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["result"], "1.00000000");

        let resp = app.oneshot(get_req("/api/convert?asset=xrp")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wait_returns_once_revision_moves() {
        let (app, st, _) = app();
        st.select("eth").unwrap();
        let rev = st.revision();
        assert!(rev > 0);

        let resp = app.oneshot(get_req("/api/wait?since=0")).await.unwrap();
        assert_eq!(body_json(resp).await["revision"], rev);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_with_unchanged_revision() {
        let (app, st, _) = app();
        st.select("usdt").unwrap();
        let rev = st.revision();

        let started = tokio::time::Instant::now();
        let resp = app
            .oneshot(get_req(&format!("/api/wait?since={rev}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["revision"], rev);
        assert!(started.elapsed() >= WAIT_TIMEOUT);
        assert_eq!(st.revision(), rev);
    }

    #[tokio::test]
    async fn health_reports_state() {
        let (app, _, _) = app();
        let resp = app.oneshot(get_req("/api/health")).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["in_flight"], false);
        assert_eq!(v["using_fallback"], false);
        assert!(v["last_updated"].is_null());
        assert_eq!(v["routes"], 3);
    }
}
