//! Route paths.

pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
pub const GET_AUTH_ME: &str = "/api/auth/me";
pub const PUT_AUTH_PROFILE: &str = "/api/auth/profile";
pub const POST_AUTH_CHANGE_PASSWORD: &str = "/api/auth/change-password";
pub const DELETE_AUTH_DELETE_ACCOUNT: &str = "/api/auth/delete-account";
