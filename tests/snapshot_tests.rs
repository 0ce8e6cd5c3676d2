// ============================================================================
// 快照测试 - 验证规则不退化
// ============================================================================

use std::path::Path;

use java_perf_radar::{ScanConfig, Scanner};

#[test]
fn test_cross_package_snapshot() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/cross-package-n-plus-one");
    let report = Scanner::new(ScanConfig::default()).unwrap().scan(&root).unwrap();
    insta::assert_json_snapshot!("cross_package_findings", report.findings);
}
