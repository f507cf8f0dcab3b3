//! End-to-end moderation flows against on-disk SQLite databases

use diesel::connection::SimpleConnection;
use sheetdir::db::pending_changes::{ChangeStatus, ChangeType, NEW_ROW_ID};
use sheetdir::db::users;
use sheetdir::{
    AppointRequest, ColumnId, ColumnRef, Config, Control, DirectoryError, DirectoryService, Filter,
    NewDirectory, RangeFilter, RequestContext, ReviewAction, Role, RowScope, RowsAllowed, UserType,
    WriteOutcome,
};
use tempfile::TempDir;

const OWNER: &str = "owner@x.com";
const ADMIN: &str = "admin@x.com";
const MODERATOR: &str = "m@x.com";
const REVIEWER: &str = "r@x.com";

struct Fixture {
    _dir: TempDir,
    service: DirectoryService,
    directory_id: String,
    /// ["Ann", "Boston", "42"]
    ann: i64,
    /// ["Bo", "Lima", "12"]
    bo: i64,
}

fn ctx(email: &str) -> RequestContext {
    RequestContext::from_email(email)
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn applied_id(outcome: WriteOutcome) -> i64 {
    match outcome {
        WriteOutcome::Applied { row_id, .. } => row_id,
        other => panic!("expected a direct write, got {:?}", other),
    }
}

fn score_above_40() -> RowScope {
    RowScope::controls(vec![Control::new(
        ColumnId::single("Score"),
        Filter::NumericRange {
            id: "score".into(),
            range: RangeFilter::Above { threshold: 40.0 },
        },
    )])
}

fn appoint(scope: RowScope, can_edit: bool, can_approve: bool, requires_approval: bool) -> AppointRequest {
    AppointRequest {
        email: String::new(),
        username: None,
        auth_provider: None,
        scope,
        can_edit,
        can_approve,
        requires_approval,
    }
}

fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let service = DirectoryService::open(&Config::with_storage_dir(dir.path())).unwrap();

    service.bootstrap_admin(ADMIN).unwrap();
    let directory = service
        .create_directory(
            &ctx(OWNER),
            &NewDirectory {
                name: "Clinics".into(),
                columns: row(&["Name", "City", "Score"]),
                ..Default::default()
            },
        )
        .unwrap();

    let ann = applied_id(
        service
            .add_row(&ctx(OWNER), &directory.id, &row(&["Ann", "Boston", "42"]))
            .unwrap(),
    );
    let bo = applied_id(
        service
            .add_row(&ctx(OWNER), &directory.id, &row(&["Bo", "Lima", "12"]))
            .unwrap(),
    );

    Fixture {
        _dir: dir,
        service,
        directory_id: directory.id,
        ann,
        bo,
    }
}

impl Fixture {
    /// Gated moderator limited to rows scoring above 40
    fn appoint_gated_moderator(&self) {
        self.service
            .appoint_moderator(
                &ctx(OWNER),
                &self.directory_id,
                &AppointRequest {
                    email: MODERATOR.into(),
                    ..appoint(score_above_40(), true, false, true)
                },
            )
            .unwrap();
    }

    fn values(&self, row_id: i64) -> Vec<String> {
        self.service.row(&self.directory_id, row_id).unwrap().values
    }
}

#[test]
fn test_role_precedence() {
    let f = setup();
    f.service.add_owner(&ctx(OWNER), &f.directory_id, ADMIN).unwrap();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: ADMIN.into(),
                ..appoint(RowScope::All, true, true, false)
            },
        )
        .unwrap();

    let resolver = f.service.resolver();
    assert_eq!(resolver.resolve_role(&ctx(ADMIN), &f.directory_id).unwrap(), Role::Admin);
    assert_eq!(f.service.user_type(&ctx(ADMIN), &f.directory_id).unwrap(), UserType::Owner);
    assert_eq!(f.service.user_type(&ctx(OWNER), &f.directory_id).unwrap(), UserType::Owner);
    assert_eq!(
        f.service.user_type(&ctx("nobody@x.com"), &f.directory_id).unwrap(),
        UserType::None
    );
    assert_eq!(
        f.service.user_type(&RequestContext::anonymous(), &f.directory_id).unwrap(),
        UserType::None
    );

    f.appoint_gated_moderator();
    assert_eq!(
        f.service.user_type(&ctx(MODERATOR), &f.directory_id).unwrap(),
        UserType::Moderator
    );
}

#[test]
fn test_appointment_is_atomic() {
    let f = setup();
    {
        let mut conn = f.service.store().system_conn().unwrap();
        conn.batch_execute(
            "CREATE TRIGGER fail_domain BEFORE INSERT ON moderator_domains \
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .unwrap();
    }

    let result = f.service.appoint_moderator(
        &ctx(OWNER),
        &f.directory_id,
        &AppointRequest {
            email: MODERATOR.into(),
            ..appoint(RowScope::All, true, false, false)
        },
    );
    assert!(result.is_err());

    assert!(f.service.moderators(&f.directory_id).unwrap().is_empty());
    assert!(f
        .service
        .resolver()
        .moderator_domain(MODERATOR, &f.directory_id)
        .unwrap()
        .is_none());
    let mut conn = f.service.store().system_conn().unwrap();
    assert!(users::get_profile(&mut conn, MODERATOR).unwrap().is_none());
}

#[test]
fn test_appointment_requires_permission_and_valid_scope() {
    let f = setup();

    let err = f
        .service
        .appoint_moderator(
            &ctx("stranger@x.com"),
            &f.directory_id,
            &AppointRequest {
                email: MODERATOR.into(),
                ..appoint(RowScope::All, true, false, false)
            },
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let bad_scope = RowScope::controls(vec![Control::new(
        ColumnId::single("Country"),
        Filter::Locations {
            values: vec!["Peru".into()],
        },
    )]);
    let err = f
        .service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: MODERATOR.into(),
                ..appoint(bad_scope, true, false, false)
            },
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));

    let err = f
        .service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: OWNER.into(),
                ..appoint(RowScope::All, true, false, false)
            },
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));
    assert!(f.service.moderators(&f.directory_id).unwrap().is_empty());
}

#[test]
fn test_gated_correction_creates_pending_change() {
    let f = setup();
    f.appoint_gated_moderator();

    let outcome = f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.ann, ColumnRef::from("City"), "NewCity")
        .unwrap();

    let change = match outcome {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };
    assert_eq!(change.old_value, "Boston");
    assert_eq!(change.new_value, "NewCity");
    assert_eq!(change.column_name, "City");
    assert_eq!(change.change_type, ChangeType::Edit);
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.column_schema, row(&["Name", "City", "Score"]));

    let pending = f.service.pending_changes(&ctx(OWNER), &f.directory_id).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(f.values(f.ann), row(&["Ann", "Boston", "42"]));
}

#[test]
fn test_admin_approval_applies_change() {
    let f = setup();
    f.appoint_gated_moderator();
    let change = match f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.ann, ColumnRef::Index(1), "NewCity")
        .unwrap()
    {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };

    let result = f
        .service
        .review_change(&ctx(ADMIN), &f.directory_id, change.id, ReviewAction::Approve, None)
        .unwrap();

    assert_eq!(result.change.status, ChangeStatus::Approved);
    assert_eq!(result.change.reviewed_by.as_deref(), Some(ADMIN));
    assert!(result.change.reviewed_at.is_some());
    assert!(result.write_back.is_none());
    assert_eq!(f.values(f.ann), row(&["Ann", "NewCity", "42"]));
    assert!(f.service.pending_changes(&ctx(OWNER), &f.directory_id).unwrap().is_empty());
}

#[test]
fn test_change_cannot_be_reviewed_twice() {
    let f = setup();
    f.appoint_gated_moderator();
    let change = match f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.ann, ColumnRef::from("City"), "NewCity")
        .unwrap()
    {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };

    f.service
        .review_change(&ctx(OWNER), &f.directory_id, change.id, ReviewAction::Approve, None)
        .unwrap();
    f.service
        .submit_correction(&ctx(OWNER), &f.directory_id, f.ann, ColumnRef::from("City"), "Salem")
        .unwrap();

    let err = f
        .service
        .review_change(&ctx(ADMIN), &f.directory_id, change.id, ReviewAction::Approve, None)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Conflict(_)));

    let err = f
        .service
        .review_change(&ctx(ADMIN), &f.directory_id, change.id, ReviewAction::Reject, None)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Conflict(_)));

    assert_eq!(f.values(f.ann), row(&["Ann", "Salem", "42"]));
}

#[test]
fn test_rejection_leaves_row_untouched() {
    let f = setup();
    f.appoint_gated_moderator();
    let change = match f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.ann, ColumnRef::from("City"), "NewCity")
        .unwrap()
    {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };

    let result = f
        .service
        .review_change(
            &ctx(OWNER),
            &f.directory_id,
            change.id,
            ReviewAction::Reject,
            Some("  not verified "),
        )
        .unwrap();

    assert_eq!(result.change.status, ChangeStatus::Rejected);
    assert_eq!(result.change.reason.as_deref(), Some("not verified"));
    assert_eq!(f.values(f.ann), row(&["Ann", "Boston", "42"]));
}

#[test]
fn test_moderator_scope_limits_writes() {
    let f = setup();
    f.appoint_gated_moderator();
    let directory = f.service.get_directory(&f.directory_id).unwrap();
    let resolver = f.service.resolver();

    assert!(resolver.can_access_row(MODERATOR, &directory, f.ann).unwrap());
    assert!(!resolver.can_access_row(MODERATOR, &directory, f.bo).unwrap());
    assert!(resolver
        .can_access_row(MODERATOR, &directory, 9_999)
        .unwrap_err()
        .is_not_found());

    let err = f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.bo, ColumnRef::from("City"), "Cusco")
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let err = f
        .service
        .add_row(&ctx(MODERATOR), &f.directory_id, &row(&["Cy", "Quito", "3"]))
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let err = f
        .service
        .submit_correction(
            &RequestContext::anonymous(),
            &f.directory_id,
            f.ann,
            ColumnRef::from("City"),
            "Cusco",
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let accessible = f.service.accessible_rows(&ctx(MODERATOR), &f.directory_id).unwrap();
    assert_eq!(accessible.len(), 1);
    assert_eq!(accessible[0].id, f.ann);
}

#[test]
fn test_ungated_moderator_writes_directly() {
    let f = setup();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: MODERATOR.into(),
                ..appoint(RowScope::All, true, false, false)
            },
        )
        .unwrap();

    let outcome = f
        .service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.bo, ColumnRef::from("Score"), "13")
        .unwrap();
    assert!(!outcome.is_queued());
    assert_eq!(f.values(f.bo), row(&["Bo", "Lima", "13"]));
}

#[test]
fn test_moderator_without_edit_permission_is_denied() {
    let f = setup();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: MODERATOR.into(),
                ..appoint(RowScope::All, false, true, false)
            },
        )
        .unwrap();

    let err = f
        .service
        .delete_row(&ctx(MODERATOR), &f.directory_id, f.ann)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));
}

#[test]
fn test_gated_add_and_delete_apply_on_approval() {
    let f = setup();
    f.appoint_gated_moderator();

    // A row without a score is outside the moderator's scope
    let err = f
        .service
        .add_row(&ctx(MODERATOR), &f.directory_id, &row(&["Cy", "Quito"]))
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let add = match f
        .service
        .add_row(&ctx(MODERATOR), &f.directory_id, &row(&["Cy", "Quito", "77", "extra"]))
        .unwrap()
    {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };
    assert_eq!(add.row_id, NEW_ROW_ID);
    assert_eq!(add.change_type, ChangeType::Add);

    let delete = match f.service.delete_row(&ctx(MODERATOR), &f.directory_id, f.ann).unwrap() {
        WriteOutcome::Queued(change) => change,
        other => panic!("expected a queued change, got {:?}", other),
    };
    assert_eq!(delete.old_value, r#"["Ann","Boston","42"]"#);

    f.service
        .review_change(&ctx(OWNER), &f.directory_id, add.id, ReviewAction::Approve, None)
        .unwrap();
    f.service
        .review_change(&ctx(OWNER), &f.directory_id, delete.id, ReviewAction::Approve, None)
        .unwrap();

    let rows = f
        .service
        .rows(&f.directory_id, &Default::default())
        .unwrap();
    let values: Vec<Vec<String>> = rows.into_iter().map(|r| r.row.values).collect();
    assert_eq!(values, vec![row(&["Bo", "Lima", "12"]), row(&["Cy", "Quito", "77"])]);
}

#[test]
fn test_moderator_review_eligibility() {
    let f = setup();
    f.appoint_gated_moderator();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: REVIEWER.into(),
                ..appoint(score_above_40(), true, true, false)
            },
        )
        .unwrap();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: "lima@x.com".into(),
                ..appoint(
                    RowScope::controls(vec![Control::new(
                        ColumnId::single("City"),
                        Filter::Locations {
                            values: vec!["lima".into()],
                        },
                    )]),
                    true,
                    true,
                    false,
                )
            },
        )
        .unwrap();

    f.service
        .submit_correction(&ctx(MODERATOR), &f.directory_id, f.ann, ColumnRef::from("City"), "NewCity")
        .unwrap();

    assert_eq!(f.service.pending_changes(&ctx(REVIEWER), &f.directory_id).unwrap().len(), 1);
    assert!(f.service.pending_changes(&ctx("lima@x.com"), &f.directory_id).unwrap().is_empty());
    // Submitters never review their own changes; this one lacks can_approve anyway
    assert!(f.service.pending_changes(&ctx(MODERATOR), &f.directory_id).unwrap().is_empty());

    let mine = f.service.my_changes(&ctx(MODERATOR), &f.directory_id).unwrap();
    assert_eq!(mine.len(), 1);

    let err = f
        .service
        .review_change(&ctx("lima@x.com"), &f.directory_id, mine[0].id, ReviewAction::Approve, None)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let result = f
        .service
        .review_change(&ctx(REVIEWER), &f.directory_id, mine[0].id, ReviewAction::Approve, None)
        .unwrap();
    assert_eq!(result.change.reviewed_by.as_deref(), Some(REVIEWER));
    assert_eq!(f.values(f.ann), row(&["Ann", "NewCity", "42"]));
}

#[test]
fn test_moderator_permissions() {
    let f = setup();
    f.appoint_gated_moderator();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: REVIEWER.into(),
                ..appoint(RowScope::All, true, true, false)
            },
        )
        .unwrap();

    let gated = f.service.moderator_permissions(&f.directory_id, MODERATOR).unwrap();
    assert!(gated.can_edit);
    assert!(!gated.can_approve);
    assert!(gated.requires_approval);
    assert_eq!(gated.rows_allowed, RowsAllowed::Only(vec![f.ann]));

    let reviewer = f.service.moderator_permissions(&f.directory_id, REVIEWER).unwrap();
    assert_eq!(reviewer.rows_allowed, RowsAllowed::All);

    let err = f
        .service
        .moderator_permissions(&f.directory_id, "nobody@x.com")
        .unwrap_err();
    assert!(err.is_not_found());

    let names: Vec<String> = f
        .service
        .moderators(&f.directory_id)
        .unwrap()
        .into_iter()
        .map(|m| m.user_email)
        .collect();
    assert_eq!(names, vec![MODERATOR.to_string(), REVIEWER.to_string()]);
}

#[test]
fn test_removal_follows_hierarchy() {
    let f = setup();
    f.appoint_gated_moderator();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: REVIEWER.into(),
                ..appoint(RowScope::All, true, true, false)
            },
        )
        .unwrap();

    // can_approve lets a moderator appoint; the gated moderator lacks it
    let err = f
        .service
        .appoint_moderator(
            &ctx(MODERATOR),
            &f.directory_id,
            &AppointRequest {
                email: "s@x.com".into(),
                ..appoint(RowScope::All, true, false, false)
            },
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let appointed = f
        .service
        .appoint_moderator(
            &ctx(REVIEWER),
            &f.directory_id,
            &AppointRequest {
                email: "s@x.com".into(),
                ..appoint(RowScope::All, true, false, false)
            },
        )
        .unwrap();
    assert_eq!(appointed.appointed_by, REVIEWER);
    assert_eq!(appointed.appointed_by_type, "moderator");

    let err = f
        .service
        .remove_moderator(&ctx(MODERATOR), &f.directory_id, "s@x.com")
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let err = f
        .service
        .remove_moderator(&ctx(REVIEWER), &f.directory_id, MODERATOR)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    assert!(f
        .service
        .remove_moderator(&ctx(REVIEWER), &f.directory_id, "s@x.com")
        .unwrap());
    assert_eq!(
        f.service.resolver().resolve_role(&ctx("s@x.com"), &f.directory_id).unwrap(),
        Role::Anonymous
    );

    // Owners remove anyone; a second removal finds nothing active
    assert!(f
        .service
        .remove_moderator(&ctx(OWNER), &f.directory_id, MODERATOR)
        .unwrap());
    assert!(!f
        .service
        .remove_moderator(&ctx(OWNER), &f.directory_id, MODERATOR)
        .unwrap());
    assert_eq!(f.service.moderators(&f.directory_id).unwrap().len(), 1);
}

#[test]
fn test_moderator_cannot_take_over_peer() {
    let f = setup();
    f.appoint_gated_moderator();
    f.service
        .appoint_moderator(
            &ctx(OWNER),
            &f.directory_id,
            &AppointRequest {
                email: REVIEWER.into(),
                ..appoint(RowScope::All, true, true, false)
            },
        )
        .unwrap();

    // Re-appointing an owner-appointed peer is refused and changes nothing
    let err = f
        .service
        .appoint_moderator(
            &ctx(REVIEWER),
            &f.directory_id,
            &AppointRequest {
                email: MODERATOR.into(),
                ..appoint(RowScope::none(), false, false, false)
            },
        )
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    let peer = f
        .service
        .moderators(&f.directory_id)
        .unwrap()
        .into_iter()
        .find(|m| m.user_email == MODERATOR)
        .unwrap();
    assert_eq!(peer.appointed_by, OWNER);
    assert_eq!(peer.appointed_by_type, "owner");

    let permissions = f.service.moderator_permissions(&f.directory_id, MODERATOR).unwrap();
    assert!(permissions.can_edit);
    assert!(permissions.requires_approval);
    assert_eq!(permissions.rows_allowed, RowsAllowed::Only(vec![f.ann]));

    let err = f
        .service
        .remove_moderator(&ctx(REVIEWER), &f.directory_id, MODERATOR)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));

    // Their own appointees stay theirs to update, even after removal
    let own = AppointRequest {
        email: "s@x.com".into(),
        ..appoint(RowScope::All, true, false, false)
    };
    f.service.appoint_moderator(&ctx(REVIEWER), &f.directory_id, &own).unwrap();
    f.service
        .remove_moderator(&ctx(REVIEWER), &f.directory_id, "s@x.com")
        .unwrap();
    let reappointed = f
        .service
        .appoint_moderator(
            &ctx(REVIEWER),
            &f.directory_id,
            &AppointRequest {
                can_edit: false,
                ..own
            },
        )
        .unwrap();
    assert!(reappointed.is_active);
    assert_eq!(reappointed.appointed_by, REVIEWER);
}

#[test]
fn test_reappointment_reactivates() {
    let f = setup();
    f.appoint_gated_moderator();
    f.service
        .remove_moderator(&ctx(OWNER), &f.directory_id, MODERATOR)
        .unwrap();
    f.appoint_gated_moderator();

    let moderators = f.service.moderators(&f.directory_id).unwrap();
    assert_eq!(moderators.len(), 1);
    assert!(moderators[0].is_active);
}

#[test]
fn test_directory_deletion_clears_permission_cache() {
    let f = setup();
    let resolver = f.service.resolver();
    assert!(resolver.is_owner(&f.directory_id, OWNER).unwrap());

    f.service.delete_directory(&ctx(OWNER), &f.directory_id).unwrap();

    assert!(!resolver.is_owner(&f.directory_id, OWNER).unwrap());
    assert!(f.service.get_directory(&f.directory_id).unwrap_err().is_not_found());
    assert_eq!(f.service.store().open_directory_pools(), 0);
}

#[test]
fn test_directory_deletion_requires_owner() {
    let f = setup();
    let err = f
        .service
        .delete_directory(&ctx("stranger@x.com"), &f.directory_id)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));
    assert!(f.service.get_directory(&f.directory_id).is_ok());
}

#[test]
fn test_admin_removal_invalidates_cache() {
    let f = setup();
    f.service.add_admin(&ctx(ADMIN), "second@x.com").unwrap();
    assert!(f.service.resolver().is_admin("second@x.com").unwrap());

    f.service.remove_admin(&ctx(ADMIN), "second@x.com").unwrap();
    assert!(!f.service.resolver().is_admin("second@x.com").unwrap());

    let err = f.service.add_admin(&ctx(OWNER), "third@x.com").unwrap_err();
    assert!(matches!(err, DirectoryError::Unauthorized));
}

#[test]
fn test_owner_management() {
    let f = setup();
    let err = f
        .service
        .remove_owner(&ctx(OWNER), &f.directory_id, OWNER)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Conflict(_)));

    assert!(!f.service.resolver().is_owner(&f.directory_id, "co@x.com").unwrap());
    assert!(f.service.add_owner(&ctx(OWNER), &f.directory_id, "Co@X.com").unwrap());
    assert!(f.service.resolver().is_owner(&f.directory_id, "co@x.com").unwrap());
    assert_eq!(f.service.list_owners(&f.directory_id).unwrap().len(), 2);

    assert!(f.service.remove_owner(&ctx("co@x.com"), &f.directory_id, OWNER).unwrap());
    assert!(!f.service.resolver().is_owner(&f.directory_id, OWNER).unwrap());
}

#[test]
fn test_row_index_helpers() {
    let f = setup();
    let cy = applied_id(
        f.service
            .add_row(&ctx(OWNER), &f.directory_id, &row(&["Cy", "Quito", "77"]))
            .unwrap(),
    );

    assert_eq!(f.service.row_id_at(&f.directory_id, 1).unwrap(), Some(f.bo));
    f.service.delete_row(&ctx(OWNER), &f.directory_id, f.bo).unwrap();

    assert_eq!(f.service.row_id_at(&f.directory_id, 1).unwrap(), Some(cy));
    assert_eq!(f.service.row_index_of(&f.directory_id, cy).unwrap(), Some(1));
    assert_eq!(f.service.row_index_of(&f.directory_id, f.bo).unwrap(), None);
    assert_eq!(f.service.row_id_at(&f.directory_id, 2).unwrap(), None);
}

#[test]
fn test_search_and_write_limits() {
    let f = setup();
    let hits = f
        .service
        .rows(
            &f.directory_id,
            &sheetdir::db::rows::RowQuery {
                search: Some("LIMA".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].index, 1);
    assert_eq!(hits[0].row.id, f.bo);

    let long = "x".repeat(1001);
    let err = f
        .service
        .submit_correction(&ctx(OWNER), &f.directory_id, f.ann, ColumnRef::from("City"), &long)
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));

    let short = f
        .service
        .add_row(&ctx(OWNER), &f.directory_id, &row(&[" Dee\u{7} "]))
        .unwrap();
    assert_eq!(f.values(applied_id(short)), row(&["Dee", "", ""]));
}
