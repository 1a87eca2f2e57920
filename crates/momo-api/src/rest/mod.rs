// REST collaborator client for cold-start and refresh loads.
//
// Base path: /api/
// Auth: `Authorization: Bearer <token>` default header

mod client;

pub use client::{RestClient, UserRole};
