mod jwt_middleware;

pub use jwt_middleware::{AuthenticatedUser, JwtMiddleware, ACCESS_TOKEN_COOKIE};
