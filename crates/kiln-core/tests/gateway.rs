//! End-to-end tests for the gateway request path.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_core::{
    CompileError, CompileUnit, Compiler, Gateway, GatewayConfig, GatewayRequest, GatewayResponse,
    Method, OxcCompiler, Outcome,
};
use tempfile::TempDir;

/// Wraps the real compiler, counting calls per file and optionally slowing
/// each call down so concurrent requests overlap.
struct CountingCompiler {
    inner: OxcCompiler,
    delay: Duration,
    calls: AtomicUsize,
    paths: Mutex<Vec<PathBuf>>,
}

impl CountingCompiler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: OxcCompiler::default(),
            delay,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn calls_for(&self, file_name: &str) -> usize {
        self.paths
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name))
            .count()
    }
}

impl Compiler for CountingCompiler {
    fn compile(&self, unit: &CompileUnit<'_>) -> Result<String, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(unit.path.to_path_buf());
        std::thread::sleep(self.delay);
        self.inner.compile(unit)
    }
}

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    compiler: Arc<CountingCompiler>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::create_dir_all(root.join("src")).unwrap();
        Self {
            _temp: temp,
            root,
            compiler: CountingCompiler::new(delay),
        }
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn install_pkg(&self) {
        self.write(
            "node_modules/pkg/package.json",
            r#"{ "name": "pkg", "module": "index.js" }"#,
        );
        self.write(
            "node_modules/pkg/index.js",
            "export { helper } from \"./lib/helper.js\";\nexport function greet(name) { return \"hi \" + name; }\n",
        );
        self.write(
            "node_modules/pkg/lib/helper.js",
            "export const helper = 42;\n",
        );
    }

    fn config(&self) -> GatewayConfig {
        GatewayConfig {
            cache_dir: self.root.join(".kiln/cache"),
            packages_dir: self.root.join("node_modules"),
            ..GatewayConfig::for_source_root(self.root.join("src"))
        }
    }

    fn gateway(&self) -> Gateway {
        self.gateway_with(self.config())
    }

    fn gateway_with(&self, config: GatewayConfig) -> Gateway {
        Gateway::with_compiler(config, self.compiler.clone()).unwrap()
    }
}

fn expect_response(outcome: Outcome) -> GatewayResponse {
    match outcome {
        Outcome::Respond(response) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

fn body(response: &GatewayResponse) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

const MATH: &str = "export function add(a: number, b: number): number {\n  return a + b;\n}\n";

#[tokio::test]
async fn test_math_module_compiles() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/math.js")).await);

    assert_eq!(response.status, 200);
    assert_eq!(
        response.content_type.as_deref(),
        Some("application/javascript; charset=utf-8")
    );
    assert_eq!(response.cache_control, "no-cache");
    assert!(response.etag.as_deref().unwrap().starts_with("W/\""));
    assert!(body(&response).contains("function add(a, b)"));
    assert!(!body(&response).contains(": number"));
}

#[tokio::test]
async fn test_matching_validator_is_not_modified() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    let first = expect_response(gateway.handle(&GatewayRequest::get("/modules/math.js")).await);
    let etag = first.etag.clone().unwrap();
    assert_eq!(fx.compiler.calls(), 1);

    let second = expect_response(
        gateway
            .handle(&GatewayRequest::get("/modules/math.js").with_if_none_match(etag.clone()))
            .await,
    );
    assert_eq!(second.status, 304);
    assert!(second.body.is_empty());
    assert_eq!(second.etag.as_deref(), Some(etag.as_str()));
    assert_eq!(fx.compiler.calls(), 1);
}

#[tokio::test]
async fn test_ttl_sets_max_age() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway_with(GatewayConfig {
        local_cache_ttl_seconds: 60,
        ..fx.config()
    });

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/math.js")).await);
    assert_eq!(response.cache_control, "max-age=60");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_local_requests_compile_once() {
    let fx = Fixture::with_delay(Duration::from_millis(100));
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            expect_response(gateway.handle(&GatewayRequest::get("/modules/math.js")).await)
        }));
    }
    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }

    assert_eq!(fx.compiler.calls(), 1);
    assert!(responses.iter().all(|r| r.status == 200));
    assert!(responses.iter().all(|r| r.body == responses[0].body));
}

#[tokio::test]
async fn test_traversal_is_a_miss() {
    let fx = Fixture::new();
    fx.write("secret.ts", "export const key = 'hunter2';\n");
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    for path in [
        "/modules/../secret.js",
        "/modules/../secret.ts",
        "/modules/./../secret.js",
        "/modules//../secret.js",
    ] {
        assert_eq!(
            gateway.handle(&GatewayRequest::get(path)).await,
            Outcome::Next,
            "{path}"
        );
    }
    assert_eq!(fx.compiler.calls(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_root_is_a_miss() {
    let fx = Fixture::new();
    fx.write("secret.ts", "export const key = 1;\n");
    std::os::unix::fs::symlink(fx.root.join("secret.ts"), fx.root.join("src/link.ts")).unwrap();
    let gateway = fx.gateway();

    assert_eq!(
        gateway.handle(&GatewayRequest::get("/modules/link.js")).await,
        Outcome::Next
    );
    assert_eq!(fx.compiler.calls(), 0);
}

#[tokio::test]
async fn test_paths_outside_prefix_and_other_methods_pass_through() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    assert_eq!(gateway.handle(&GatewayRequest::get("/math.js")).await, Outcome::Next);
    assert_eq!(gateway.handle(&GatewayRequest::get("/modulesx/math.js")).await, Outcome::Next);
    assert_eq!(gateway.handle(&GatewayRequest::get("/modules")).await, Outcome::Next);
    assert_eq!(gateway.handle(&GatewayRequest::get("/modules/missing.js")).await, Outcome::Next);

    let post = GatewayRequest {
        method: Method::Other,
        ..GatewayRequest::get("/modules/math.js")
    };
    assert_eq!(gateway.handle(&post).await, Outcome::Next);
    assert_eq!(fx.compiler.calls(), 0);
}

#[tokio::test]
async fn test_query_string_is_ignored() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    let response =
        expect_response(gateway.handle(&GatewayRequest::get("/modules/math.js?v=3")).await);
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_head_returns_headers_only() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway();

    let response = expect_response(gateway.handle(&GatewayRequest::head("/modules/math.js")).await);
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert!(response.etag.is_some());
}

#[tokio::test]
async fn test_build_failure_is_diagnostic_script() {
    let fx = Fixture::new();
    fx.write("src/broken.ts", "export const = ;\n");
    let gateway = fx.gateway();

    let response =
        expect_response(gateway.handle(&GatewayRequest::get("/modules/broken.js")).await);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.content_type.as_deref(),
        Some("application/javascript; charset=utf-8")
    );
    assert_eq!(response.cache_control, "no-cache");
    assert!(response.etag.is_none());
    assert!(body(&response).contains("console.error"));
    assert!(body(&response).contains("\"broken.ts\""));
}

#[tokio::test]
async fn test_stylesheets_are_served() {
    let fx = Fixture::new();
    fx.write("src/theme.css", "body { color: red; }\n");
    let gateway = fx.gateway();

    let response =
        expect_response(gateway.handle(&GatewayRequest::get("/modules/theme.css")).await);
    assert_eq!(response.content_type.as_deref(), Some("text/css; charset=utf-8"));
    assert_eq!(body(&response), "body { color: red; }\n");
}

#[tokio::test]
async fn test_local_imports_are_rewritten() {
    let fx = Fixture::new();
    fx.install_pkg();
    fx.write("src/math.ts", MATH);
    fx.write(
        "src/app.ts",
        "import { add } from './math';\nimport { greet } from 'pkg';\nexport const label = `import x from \"pkg\"`;\nexport const out = greet(String(add(1, 2)));\n",
    );
    let gateway = fx.gateway();

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/app.js")).await);
    let text = body(&response);
    assert!(text.contains("\"./math.js\""), "{text}");
    assert!(text.contains("\"/modules/vendor/pkg\""), "{text}");
    assert!(text.contains("`import x from \"pkg\"`"), "{text}");
}

#[tokio::test]
async fn test_pkg_is_built_once_and_persisted() {
    let fx = Fixture::new();
    fx.install_pkg();
    fx.write("src/a.ts", "import { greet } from 'pkg';\nexport const a = greet('a');\n");
    fx.write("src/b.ts", "import { greet } from 'pkg';\nexport const b = greet('b');\n");
    let gateway = fx.gateway();
    assert!(gateway.trust().is_trusted("pkg"));

    for path in ["/modules/a.js", "/modules/b.js"] {
        let response = expect_response(gateway.handle(&GatewayRequest::get(path)).await);
        assert!(body(&response).contains("/modules/vendor/pkg"));
    }

    let first = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);
    assert_eq!(first.status, 200);
    assert_eq!(first.cache_control, "public, max-age=31536000, immutable");
    assert!(body(&first).contains("\"/modules/vendor/pkg/lib/helper.js\""));
    assert!(gateway.store().contains("pkg").await);

    let second = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);
    assert_eq!(second.body, first.body);
    assert_eq!(fx.compiler.calls_for("index.js"), 1);

    // A restarted gateway serves the persisted entry without compiling.
    let restarted = fx.gateway();
    let third = expect_response(restarted.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);
    assert_eq!(third.body, first.body);
    assert_eq!(fx.compiler.calls_for("index.js"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_vendor_requests_build_once() {
    let fx = Fixture::with_delay(Duration::from_millis(100));
    fx.install_pkg();
    fx.write("src/a.ts", "import { greet } from 'pkg';\nexport const a = greet('a');\n");
    let gateway = fx.gateway();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await)
        }));
    }
    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }

    assert_eq!(fx.compiler.calls_for("index.js"), 1);
    assert!(responses.iter().all(|r| r.status == 200 && r.body == responses[0].body));
}

#[tokio::test]
async fn test_package_relative_import_is_served() {
    let fx = Fixture::new();
    fx.install_pkg();
    fx.write("src/a.ts", "import { greet } from 'pkg';\nexport const a = greet('a');\n");
    let gateway = fx.gateway();

    let response = expect_response(
        gateway
            .handle(&GatewayRequest::get("/modules/vendor/pkg/lib/helper.js"))
            .await,
    );
    assert!(body(&response).contains("helper = 42"));
    assert!(gateway.store().contains("pkg/lib/helper.js").await);
}

#[tokio::test]
async fn test_vendor_regex_after_if_condition() {
    let fx = Fixture::new();
    fx.write(
        "node_modules/rx/package.json",
        r#"{ "name": "rx", "module": "index.js" }"#,
    );
    fx.write(
        "node_modules/rx/index.js",
        "export function q(s) { if (s) /'/.test(s); return 1; }\n",
    );
    fx.write("src/a.ts", "import { q } from 'rx';\nexport const a = q('a');\n");
    let gateway = fx.gateway();

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/rx")).await);
    let text = body(&response);
    assert_eq!(response.status, 200);
    assert_eq!(response.cache_control, "public, max-age=31536000, immutable");
    assert!(!text.contains("__kiln_message"), "{text}");
    assert!(text.contains("/'/.test(s)"), "{text}");
}

#[tokio::test]
async fn test_failed_persist_still_serves_and_rebuilds() {
    let fx = Fixture::new();
    fx.install_pkg();
    fx.write("src/a.ts", "import { greet } from 'pkg';\nexport const a = greet('a');\n");
    fx.write("blocker", "not a directory\n");
    let gateway = fx.gateway_with(GatewayConfig {
        cache_dir: fx.root.join("blocker/cache"),
        ..fx.config()
    });

    let first = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);
    let second = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);

    assert_eq!(first.status, 200);
    assert_eq!(second.status, 200);
    assert_eq!(first.body, second.body);
    assert!(body(&first).contains("function greet"));
    assert!(!body(&first).contains("__kiln_message"));
    assert_eq!(fx.compiler.calls_for("index.js"), 2);
    assert!(!gateway.store().contains("pkg").await);
}

#[tokio::test]
async fn test_untrusted_package_is_a_miss() {
    let fx = Fixture::new();
    fx.install_pkg();
    fx.write(
        "node_modules/lurker/package.json",
        r#"{ "name": "lurker", "main": "index.js" }"#,
    );
    fx.write("node_modules/lurker/index.js", "export default 1;\n");
    let gateway = fx.gateway();

    assert_eq!(
        gateway.handle(&GatewayRequest::get("/modules/vendor/lurker")).await,
        Outcome::Next
    );
    assert_eq!(
        gateway.handle(&GatewayRequest::get("/modules/vendor/left-pad")).await,
        Outcome::Next
    );
    assert_eq!(fx.compiler.calls(), 0);
    assert!(!gateway.store().contains("lurker").await);
}

#[tokio::test]
async fn test_untrusted_package_redirects_with_cdn() {
    let fx = Fixture::new();
    let gateway = fx.gateway_with(GatewayConfig {
        cdn_fallback: true,
        ..fx.config()
    });

    assert_eq!(
        gateway.handle(&GatewayRequest::get("/modules/vendor/left-pad")).await,
        Outcome::Redirect("https://esm.sh/left-pad".to_string())
    );
    assert_eq!(fx.compiler.calls(), 0);
}

#[tokio::test]
async fn test_malformed_vendor_specifiers_are_misses() {
    let fx = Fixture::new();
    fx.install_pkg();
    let gateway = fx.gateway_with(GatewayConfig {
        prewarm: vec!["pkg".to_string()],
        cdn_fallback: true,
        ..fx.config()
    });

    for path in [
        "/modules/vendor/",
        "/modules/vendor/pkg/../../secret",
        "/modules/vendor/./pkg",
        "/modules/vendor/pkg//index.js",
        "/modules/vendor/..%2Fsecret/x",
    ] {
        let outcome = gateway.handle(&GatewayRequest::get(path)).await;
        assert!(
            matches!(outcome, Outcome::Next | Outcome::Redirect(_)),
            "{path}: {outcome:?}"
        );
        assert!(!matches!(outcome, Outcome::Respond(_)), "{path}");
    }
}

#[tokio::test]
async fn test_global_shim() {
    let fx = Fixture::new();
    let mut globals = BTreeMap::new();
    globals.insert("react".to_string(), "React".to_string());
    let gateway = fx.gateway_with(GatewayConfig {
        globals,
        ..fx.config()
    });
    assert!(gateway.trust().is_trusted("react"));

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/react")).await);
    assert_eq!(response.status, 200);
    assert!(body(&response).contains("globalThis[\"React\"]"));
    assert_eq!(fx.compiler.calls(), 0);
}

#[tokio::test]
async fn test_prewarm_builds_into_cache() {
    let fx = Fixture::new();
    fx.install_pkg();
    let gateway = fx.gateway_with(GatewayConfig {
        prewarm: vec!["pkg".to_string(), "missing-pkg".to_string()],
        ..fx.config()
    });

    assert_eq!(gateway.prewarm(), 2);
    assert_eq!(gateway.wait_for_prewarm().await, 1);
    assert!(gateway.store().contains("pkg").await);

    let response = expect_response(gateway.handle(&GatewayRequest::get("/modules/vendor/pkg")).await);
    assert_eq!(response.status, 200);
    assert_eq!(fx.compiler.calls_for("index.js"), 1);
}

#[tokio::test]
async fn test_root_prefix() {
    let fx = Fixture::new();
    fx.write("src/math.ts", MATH);
    let gateway = fx.gateway_with(GatewayConfig {
        public_prefix: "/".to_string(),
        ..fx.config()
    });

    let response = expect_response(gateway.handle(&GatewayRequest::get("/math.js")).await);
    assert_eq!(response.status, 200);
}

#[test]
fn test_missing_source_root_is_error() {
    let temp = TempDir::new().unwrap();
    let config = GatewayConfig::for_source_root(temp.path().join("nope"));
    let err = Gateway::new(config).unwrap_err();
    assert!(matches!(err, kiln_core::Error::SourceRootMissing(_)));
}
