use std::sync::Arc;
use std::time::Duration;

use domain::{DomainError, RepositoryError, Timestamp, User, UserEmail, UserId, Username};
use serde::Serialize;

use crate::{
    bounded::bounded, clock::Clock, error::ApplicationError, hub::ConnectionRegistry,
    password::PasswordHasher, repository::UserRepository,
};

pub const SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub password: String,
}

/// 搜索结果中的用户，附带在线状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: Username,
    pub last_seen: Option<Timestamp>,
    pub is_online: bool,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ConnectionRegistry>,
    pub storage_timeout: Duration,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;

        let existing = bounded(
            "find user by email",
            self.deps.storage_timeout,
            self.deps.user_repository.find_by_email(email.clone()),
        )
        .await?;
        if existing.is_some() {
            return Err(DomainError::UserAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let user = User::register(
            UserId::generate(),
            username,
            email,
            password_hash,
            self.deps.clock.now(),
        );

        bounded(
            "create user",
            self.deps.storage_timeout,
            self.deps.user_repository.create(user),
        )
        .await
        .map_err(|err| match err {
            ApplicationError::Repository(RepositoryError::AlreadyExists) => {
                DomainError::UserAlreadyExists.into()
            }
            other => other,
        })
    }

    /// 邮箱不存在返回 `UserNotFound`，密码错误返回 `Authentication`
    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email)?;
        let user = bounded(
            "find user by email",
            self.deps.storage_timeout,
            self.deps.user_repository.find_by_email(email),
        )
        .await?
        .ok_or(DomainError::UserNotFound)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(ApplicationError::Authentication);
        }

        Ok(user)
    }

    pub async fn get(&self, id: UserId) -> Result<User, ApplicationError> {
        bounded(
            "find user",
            self.deps.storage_timeout,
            self.deps.user_repository.find_by_id(id),
        )
        .await?
        .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn search(
        &self,
        requester: UserId,
        query: &str,
    ) -> Result<Vec<UserSummary>, ApplicationError> {
        let users = bounded(
            "search users",
            self.deps.storage_timeout,
            self.deps
                .user_repository
                .search(requester, query.trim().to_owned(), SEARCH_LIMIT),
        )
        .await?;

        Ok(users
            .into_iter()
            .map(|user| UserSummary {
                is_online: self.deps.registry.is_online(user.id),
                id: user.id,
                username: user.username,
                last_seen: user.last_seen,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::MemoryStore;
    use crate::password::MockPasswordHasher;
    use domain::PasswordHash;

    fn service(hasher: MockPasswordHasher) -> (UserService, MemoryStore, Arc<ConnectionRegistry>) {
        let store = MemoryStore::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let service = UserService::new(UserServiceDependencies {
            user_repository: Arc::new(store.clone()),
            password_hasher: Arc::new(hasher),
            clock: Arc::new(SystemClock),
            registry: registry.clone(),
            storage_timeout: Duration::from_secs(5),
        });
        (service, store, registry)
    }

    fn plain_hasher() -> MockPasswordHasher {
        let mut hasher = MockPasswordHasher::new();
        hasher
            .expect_hash()
            .returning(|plain| Ok(PasswordHash::new(format!("hashed:{plain}")).unwrap()));
        hasher
            .expect_verify()
            .returning(|plain, hashed| Ok(hashed.as_str() == format!("hashed:{plain}")));
        hasher
    }

    fn request(name: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password: "correct horse".to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let (service, _store, _registry) = service(plain_hasher());
        let user = service.register(request("alice")).await.unwrap();
        assert!(user.last_seen.is_none());

        let authed = service
            .authenticate(AuthenticateUserRequest {
                email: "alice@example.com".into(),
                password: "correct horse".into(),
            })
            .await
            .unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (service, _store, _registry) = service(plain_hasher());
        service.register(request("alice")).await.unwrap();
        let err = service.register(request("alice")).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::UserAlreadyExists)
        ));
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn authentication_failures_are_distinguished() {
        let (service, _store, _registry) = service(plain_hasher());
        service.register(request("alice")).await.unwrap();

        let unknown = service
            .authenticate(AuthenticateUserRequest {
                email: "nobody@example.com".into(),
                password: "x".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(unknown.status_code(), 404);

        let wrong = service
            .authenticate(AuthenticateUserRequest {
                email: "alice@example.com".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(wrong, ApplicationError::Authentication));
    }

    #[tokio::test]
    async fn search_reports_online_flag() {
        let (service, _store, registry) = service(plain_hasher());
        let alice = service.register(request("alice")).await.unwrap();
        let bob = service.register(request("bob")).await.unwrap();
        service.register(request("bobby")).await.unwrap();

        let (handle, _rx) = crate::hub::ConnectionHandle::open();
        registry.register(bob.id, handle);

        let found = service.search(alice.id, "bob").await.unwrap();
        let flags: Vec<(&str, bool)> = found
            .iter()
            .map(|u| (u.username.as_str(), u.is_online))
            .collect();
        assert_eq!(flags, vec![("bob", true), ("bobby", false)]);
    }
}
