//! Races against the in-memory store through the public facade.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use warden_auth::{AuthConfig, AuthService, ErrorKind, NewRole, NewUser, PasswordCost};
use warden_core::{Clock, ManualClock, UserId};
use warden_infra::InMemoryAuthStore;

const RACERS: usize = 16;

fn service(clock: Arc<ManualClock>) -> (AuthService<InMemoryAuthStore>, Arc<InMemoryAuthStore>) {
    warden_observability::init_for_tests();
    let store = Arc::new(InMemoryAuthStore::new());
    let config = AuthConfig::default().with_password_cost(PasswordCost::minimal());
    let service = AuthService::with_clock(store.clone(), clock as Arc<dyn Clock>, config);
    (service, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logins_leave_one_active_session() {
    let (service, _store) = service(Arc::new(ManualClock::new(Utc::now())));
    let alice = service
        .register_user(NewUser::new("alice@x.com", "alice", "correct horse"))
        .await
        .unwrap()
        .id;

    let mut tasks = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .sessions()
                .create_session(alice, Duration::hours(1))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let active = service.active_sessions(alice).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumes_yield_exactly_one_success() {
    let (service, _store) = service(Arc::new(ManualClock::new(Utc::now())));
    let alice = service
        .register_user(NewUser::new("alice@x.com", "alice", "correct horse"))
        .await
        .unwrap()
        .id;
    let token = service.issue_token(alice).await.unwrap();

    let mut tasks = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let service = service.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            service.consume_token(&token, alice).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn role_delete_racing_assignments_leaves_no_dangling_role() {
    let (service, _store) = service(Arc::new(ManualClock::new(Utc::now())));
    let editor = service.create_role(NewRole::named("editor")).await.unwrap().id;

    let mut users = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let user = NewUser::new(format!("user{i}@x.com"), format!("user{i}"), "correct horse");
        users.push(service.register_user(user).await.unwrap().id);
    }

    let deleter = {
        let service = service.clone();
        tokio::spawn(async move { service.delete_role(editor).await })
    };
    let mut assigners = Vec::with_capacity(RACERS);
    for &user in &users {
        let service = service.clone();
        assigners.push(tokio::spawn(async move {
            service.assign_role(user, Some(editor)).await
        }));
    }

    let mut assigned = 0;
    for task in assigners {
        match task.await.unwrap() {
            Ok(_) => assigned += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
        }
    }
    let deleted = deleter.await.unwrap();

    let role_exists = service.get_role(editor).await.unwrap().is_some();
    match deleted {
        Ok(()) => assert!(!role_exists),
        Err(err) => {
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert!(role_exists);
        }
    }
    for user in users {
        let role = service.get_user(user).await.unwrap().unwrap().role_id;
        assert!(role.is_none() || role_exists);
    }
    assert!(assigned == 0 || role_exists);
}

#[derive(Debug, Clone)]
enum Op {
    Login(usize),
    Advance(i64),
    Logout(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..3).prop_map(Op::Login),
        2 => (1i64..3_000).prop_map(Op::Advance),
        1 => (0usize..3).prop_map(Op::Logout),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn at_most_one_active_session_per_user(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let (service, _store) = service(clock.clone());
            let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
            let ttl = Duration::seconds(3600);

            for op in ops {
                match op {
                    Op::Login(i) => {
                        let session =
                            service.sessions().create_session(users[i], ttl).await.unwrap();
                        let active = service.active_sessions(users[i]).await.unwrap();
                        prop_assert_eq!(active, vec![session]);
                    }
                    Op::Advance(secs) => clock.advance(Duration::seconds(secs)),
                    Op::Logout(i) => {
                        service.logout_everywhere(users[i]).await.unwrap();
                        prop_assert!(service.active_sessions(users[i]).await.unwrap().is_empty());
                    }
                }
                for &user in &users {
                    prop_assert!(service.active_sessions(user).await.unwrap().len() <= 1);
                }
            }
            Ok(())
        })?;
    }
}
