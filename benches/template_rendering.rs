//! 消息模板基准测试
//!
//! 测试失败消息模板的渲染性能和结果序列化开销

use criterion::{criterion_group, criterion_main, Criterion};
use probe_agent::health::{render_error, CheckResult, CheckerInfo, MessageTemplate, Status};
use serde_json::json;
use std::hint::black_box;

/// 模板渲染基准测试
fn template_rendering_benchmark(c: &mut Criterion) {
    let template = MessageTemplate::compile(
        "status_code",
        "received status code {{response.status_code}}, \
         I was looking for {{cfg.code}}; original: {{err}}",
    )
    .unwrap();
    let model = json!({
        "cfg": { "name": "api", "code": 200 },
        "response": { "status_code": 503, "status": "503 Service Unavailable", "headers": {} },
        "response_body": { "message": "down" },
        "elapsed_time": "80ms",
        "err": "invalid status code: 503 instead of 200",
    });

    c.bench_function("template_render_status_code", |b| {
        b.iter(|| black_box(render_error(Some(&template), black_box(&model))))
    });

    let broken = MessageTemplate::compile("broken", "{{missing.field}}").unwrap();
    c.bench_function("template_render_failure", |b| {
        b.iter(|| black_box(render_error(Some(&broken), black_box(&model))))
    });

    c.bench_function("template_render_nil", |b| {
        b.iter(|| black_box(render_error(None, black_box(&model))))
    });
}

/// 检测结果序列化基准测试
fn result_serialization_benchmark(c: &mut Criterion) {
    let result = CheckResult {
        status: Status::Critical,
        message: "critical timeout: request took 65ms instead of 50ms".to_string(),
        checker: CheckerInfo {
            plugin: "HTTP".to_string(),
            service: "api".to_string(),
        },
    };

    c.bench_function("check_result_serialization", |b| {
        b.iter(|| black_box(serde_json::to_string(black_box(&result)).unwrap()))
    });
}

criterion_group!(
    benches,
    template_rendering_benchmark,
    result_serialization_benchmark
);
criterion_main!(benches);
