// ============================================================================
// 端到端扫描 - 跨包 Controller → Service → Repository
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use java_perf_radar::scanner::{Confidence, Severity};
use java_perf_radar::{ScanConfig, ScanError, Scanner};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn scanner() -> Scanner {
    Scanner::new(ScanConfig::default()).unwrap()
}

#[test]
fn test_cross_package_n_plus_one() {
    let report = scanner().scan(&fixture("cross-package-n-plus-one")).unwrap();

    assert_eq!(report.stats.files_scanned, 3);
    assert!(report.skipped.is_empty());
    assert_eq!(report.findings.len(), 1, "{:#?}", report.findings);

    let finding = &report.findings[0];
    assert_eq!(finding.rule_id, "N_PLUS_ONE");
    assert_eq!(finding.severity, Severity::P0);
    assert_eq!(finding.file, "src/main/java/com/example/service/OrderService.java");
    assert_eq!(finding.line, 24);
    assert_eq!(finding.confidence, Some(Confidence::High));
    assert_eq!(
        finding.call_chain,
        vec![
            "OrderService.findAllWithDetails".to_string(),
            "OrderRepository.findItemsByOrderId".to_string()
        ]
    );
}

#[test]
fn test_scan_is_idempotent() {
    let root = fixture("cross-package-n-plus-one");
    let first = scanner().scan(&root).unwrap();
    let second = scanner().scan(&root).unwrap();
    assert_eq!(first.findings, second.findings);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_missing_root() {
    let err = scanner().scan(Path::new("/no/such/project")).unwrap_err();
    assert!(matches!(err, ScanError::RootNotFound(_)));
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_spring_project_with_config_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "pom.xml",
        r#"<project>
  <dependencies>
    <dependency>
      <groupId>org.springframework.boot</groupId>
      <artifactId>spring-boot-starter-web</artifactId>
    </dependency>
  </dependencies>
</project>"#,
    );
    write(root, ".java-perf.yaml", "disabled_rules: [SYNC_METHOD]\n");
    write(
        root,
        "src/main/java/com/demo/UserController.java",
        r#"package com.demo;

@RestController
public class UserController {
    @Autowired
    private UserService userService;

    public synchronized String hello() {
        return "hi";
    }
}
"#,
    );
    write(root, "src/main/java/com/demo/Broken.java", "public class Broken {\n    void f( {\n}\n");

    let config = ScanConfig::discover(root).unwrap();
    let report = Scanner::new(config).unwrap().scan(root).unwrap();

    assert!(report.stack.is_spring_boot);
    let rules: Vec<&str> = report.findings.iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(rules, vec!["AUTOWIRED_FIELD"]);
    assert_eq!(report.findings[0].line, 6);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, "src/main/java/com/demo/Broken.java");
}

#[test]
fn test_invalid_config_names_path() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), ".java-perf.yaml", "disabled_rules: {not: a list\n");
    let err = ScanConfig::discover(dir.path()).unwrap_err();
    match err {
        ScanError::Config { path, .. } => assert!(path.ends_with(".java-perf.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}
