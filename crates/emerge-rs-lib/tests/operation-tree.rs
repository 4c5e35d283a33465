use emerge_rs::*;
use emerge_rs::operation_tree::*;
use emerge_rs::overlay::AttributeValue;
use emerge_rs_test_utils::*;

fn pkg(s: &str) -> PackageRef {
	PackageRef::parse(s).unwrap()
}

fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn dependency_already_installed() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		installed("app-misc/bar-2.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();

	assert_eq!(tree.len(QueueKind::Install), 2);
	let snapshot = tree.snapshot();
	assert_eq!(snapshot.install.len(), 1);
	assert_eq!(snapshot.install[0].children[0].package, pkg("app-misc/bar-2.0"));
	assert!(tree.units(QueueKind::Install).iter().all(|p| !tree.node(QueueKind::Install, p).unwrap().metadata.is_update));
	assert_eq!(tree.selections(false), &[pkg("app-misc/foo-1.0")]);
}

#[test]
fn dependency_update_metadata() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		installed("app-misc/bar-1.0", &[]).unwrap(),
		record("app-misc/bar-2.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();

	let bar = tree.node(QueueKind::Install, &pkg("app-misc/bar-2.0")).unwrap();
	assert!(bar.metadata.is_update);
	assert!(!bar.metadata.is_downgrade);
	assert_eq!(bar.metadata.from_version.as_ref().unwrap().to_string(), "1.0");
	assert!(!tree.node(QueueKind::Install, &pkg("app-misc/foo-1.0")).unwrap().metadata.is_update);
}

#[test]
fn blocked_request_is_rolled_back() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-2.0", &["!app-misc/baz"]).unwrap(),
		installed("app-misc/baz-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	let result = tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default());

	match result {
		Err(QueueError::Blocked { requested, blocker }) => {
			assert_eq!(requested, pkg("app-misc/bar-2.0"));
			assert_eq!(blocker, pkg("app-misc/baz-1.0"));
		},
		other => panic!("expected a block, got {:?}", other),
	}
	assert_eq!(tree.len(QueueKind::Install), 0);
	assert!(tree.selections(false).is_empty());
	assert!(tree.is_empty());
}

#[test]
fn queued_blocker() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &[]).unwrap(),
		record("app-misc/bar-1.0", &["!app-misc/foo"]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	let result = tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/bar-1.0"), QueueKind::Install, AppendOptions::default());

	match result {
		Err(QueueError::Blocked { requested, blocker }) => {
			assert_eq!(requested, pkg("app-misc/bar-1.0"));
			assert_eq!(blocker, pkg("app-misc/foo-1.0"));
		},
		other => panic!("expected a block, got {:?}", other),
	}
	assert_eq!(tree.top_level(QueueKind::Install), vec![pkg("app-misc/foo-1.0")]);
}

#[test]
fn blocked_by_queued_package() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &[]).unwrap(),
		record("app-misc/bar-1.0", &["!app-misc/foo"]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/bar-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	let result = tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default());

	match result {
		Err(QueueError::Blocked { requested, blocker }) => {
			assert_eq!(requested, pkg("app-misc/foo-1.0"));
			assert_eq!(blocker, pkg("app-misc/bar-1.0"));
		},
		other => panic!("expected a block, got {:?}", other),
	}
	assert_eq!(tree.top_level(QueueKind::Install), vec![pkg("app-misc/bar-1.0")]);
}

#[test]
fn dependency_cycle() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &["app-misc/foo"]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();

	assert_eq!(tree.len(QueueKind::Install), 2);
	assert_eq!(tree.top_level(QueueKind::Install), vec![pkg("app-misc/foo-1.0")]);
	let bar = tree.children(QueueKind::Install, &pkg("app-misc/foo-1.0"));
	assert_eq!(bar.len(), 1);
	assert_eq!(bar[0].package, pkg("app-misc/bar-1.0"));
	assert!(tree.children(QueueKind::Install, &pkg("app-misc/bar-1.0")).is_empty());
}

#[test]
fn append_is_idempotent() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	let before = tree.snapshot();
	tree.append(catalog.as_ref(), &mut overlay, Specifier::parse("app-misc/foo").unwrap(), QueueKind::Install, AppendOptions::default()).unwrap();
	assert_eq!(tree.snapshot(), before);
}

#[test]
fn queued_dependency_becomes_selection() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/bar-1.0"), QueueKind::Install, AppendOptions { oneshot: true, ..Default::default() }).unwrap();

	assert_eq!(tree.len(QueueKind::Install), 2);
	assert_eq!(tree.selections(false), &[pkg("app-misc/foo-1.0")]);
	assert_eq!(tree.selections(true), &[pkg("app-misc/bar-1.0")]);
}

#[test]
fn shared_dependency_is_queued_once() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["dev-libs/common"]).unwrap(),
		record("app-misc/bar-1.0", &["dev-libs/common"]).unwrap(),
		record("dev-libs/common-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/bar-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();

	assert_eq!(tree.len(QueueKind::Install), 3);
	assert!(tree.children(QueueKind::Install, &pkg("app-misc/bar-1.0")).is_empty());
	assert_eq!(tree.top_level(QueueKind::Install), vec![pkg("app-misc/foo-1.0"), pkg("app-misc/bar-1.0")]);
}

#[test]
fn remove_subtree() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &["app-misc/baz"]).unwrap(),
		record("app-misc/baz-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	assert_eq!(tree.units(QueueKind::Install), vec![pkg("app-misc/foo-1.0"), pkg("app-misc/bar-1.0"), pkg("app-misc/baz-1.0")]);

	assert_eq!(tree.remove_subtree(&mut overlay, &pkg("app-misc/bar-1.0"), QueueKind::Install, true).unwrap(), 2);
	assert_eq!(tree.len(QueueKind::Install), 1);
	assert_eq!(tree.remove_subtree(&mut overlay, &pkg("app-misc/foo-1.0"), QueueKind::Install, true).unwrap(), 1);
	assert!(tree.is_empty());
	assert!(tree.selections(false).is_empty());
	assert!(matches!(
		tree.remove_subtree(&mut overlay, &pkg("app-misc/foo-1.0"), QueueKind::Install, true),
		Err(QueueError::NotQueued(_))
	));
}

#[test]
fn flag_change_rebuilds_subtree() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let mut foo = record("app-misc/foo-1.0", &["ssl? dev-libs/openssl"]).unwrap();
	foo.iuse = vec!["ssl".to_string()];
	let catalog = catalog([foo.clone(), record("dev-libs/openssl-3.0", &[]).unwrap()]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	assert_eq!(tree.len(QueueKind::Install), 1);

	overlay.set(&foo, AttributeValue::Flag("ssl".to_string())).unwrap();
	tree.update_append(catalog.as_ref(), &mut overlay, &foo.package, QueueKind::Install, AppendOptions::default()).unwrap();
	assert_eq!(tree.len(QueueKind::Install), 2);
	assert_eq!(tree.children(QueueKind::Install, &foo.package)[0].package, pkg("dev-libs/openssl-3.0"));
	assert_eq!(tree.selections(false), &[foo.package.clone()]);
	assert!(overlay.has_edits(&foo.package));

	overlay.set(&foo, AttributeValue::Flag("-ssl".to_string())).unwrap();
	assert!(!overlay.is_dirty());
	tree.update_append(catalog.as_ref(), &mut overlay, &foo.package, QueueKind::Install, AppendOptions::default()).unwrap();
	assert_eq!(tree.len(QueueKind::Install), 1);
}

#[test]
fn rebuild_keeps_position() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let mut foo = record("app-misc/foo-1.0", &["ssl? dev-libs/openssl"]).unwrap();
	foo.iuse = vec!["ssl".to_string()];
	let catalog = catalog([
		foo.clone(),
		record("app-misc/baz-1.0", &[]).unwrap(),
		record("dev-libs/openssl-3.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/baz-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();

	overlay.set(&foo, AttributeValue::Flag("ssl".to_string())).unwrap();
	tree.update_append(catalog.as_ref(), &mut overlay, &foo.package, QueueKind::Install, AppendOptions::default()).unwrap();

	assert_eq!(tree.top_level(QueueKind::Install), vec![pkg("app-misc/foo-1.0"), pkg("app-misc/baz-1.0")]);
	assert_eq!(tree.children(QueueKind::Install, &foo.package)[0].package, pkg("dev-libs/openssl-3.0"));
	assert_eq!(tree.selections(false), &[pkg("app-misc/foo-1.0"), pkg("app-misc/baz-1.0")]);
}

#[test]
fn masked_dependency_needs_unmask() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let mut bar = record("app-misc/bar-2.0", &[]).unwrap();
	bar.masked = true;
	let catalog = catalog([record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(), bar]);

	let mut tree = OperationTree::new();
	let result = tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default());
	assert!(matches!(result, Err(QueueError::NotFound(_))));
	assert!(!overlay.is_dirty());

	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions { unmask: true, ..Default::default() }).unwrap();
	assert_eq!(tree.len(QueueKind::Install), 2);
	assert_eq!(overlay.new_masking_status(&pkg("app-misc/bar-2.0")), Some(false));

	tree.remove_subtree(&mut overlay, &pkg("app-misc/foo-1.0"), QueueKind::Install, true).unwrap();
	assert!(!overlay.is_dirty());
}

#[test]
fn uninstall_needs_installed_package() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		installed("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, Specifier::parse("app-misc/foo").unwrap(), QueueKind::Uninstall, AppendOptions::default()).unwrap();
	assert_eq!(tree.len(QueueKind::Uninstall), 1);
	assert!(tree.children(QueueKind::Uninstall, &pkg("app-misc/foo-1.0")).is_empty());

	let result = tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/bar-1.0"), QueueKind::Uninstall, AppendOptions::default());
	assert!(matches!(result, Err(QueueError::NotFound(_))));
}

#[test]
fn in_progress_marks() {
	init_log();
	let root = ConfigRoot::new().unwrap();
	let mut overlay = root.overlay();
	let catalog = catalog([
		record("app-misc/foo-1.0", &["app-misc/bar"]).unwrap(),
		record("app-misc/bar-1.0", &[]).unwrap(),
	]);

	let mut tree = OperationTree::new();
	tree.append(catalog.as_ref(), &mut overlay, pkg("app-misc/foo-1.0"), QueueKind::Install, AppendOptions::default()).unwrap();
	tree.set_in_progress(QueueKind::Install, &[pkg("app-misc/foo-1.0")], true);
	assert_eq!(tree.node(QueueKind::Install, &pkg("app-misc/bar-1.0")).unwrap().state, NodeState::InProgress);
	tree.set_in_progress(QueueKind::Install, &[pkg("app-misc/foo-1.0")], false);
	assert_eq!(tree.node(QueueKind::Install, &pkg("app-misc/bar-1.0")).unwrap().state, NodeState::Expanded);
}
