/*
Aliases for data types for readability and to allow resizing in future
*/

pub type PortNumber = u16; // Conforms to TCP/IP port numbering
pub type ConnectionId = u32; // Identifies an inbound connection for the life of the server
pub type ViewId = u64; // Membership views are numbered from 1 and only ever increase
pub type ProcessId = u32; // Operating system process id
pub type Timestamp = i64; // Milliseconds since the Unix epoch
pub type RequestId = u32; // Correlates a request with its reply
