//! `masternode` table queries.

use std::net::SocketAddr;

use mnstore_types::{Peer, PeerId};
use rusqlite::Connection;

use crate::{DbError, Result};

/// Insert or refresh a peer and mark it active.
pub fn upsert(conn: &Connection, peer: &Peer) -> Result<()> {
    conn.execute(
        "INSERT INTO masternode (identifier, address, active) VALUES (?1, ?2, 1)
         ON CONFLICT(identifier) DO UPDATE SET address = excluded.address, active = 1",
        rusqlite::params![
            peer.identifier.as_bytes().as_slice(),
            peer.address.to_string()
        ],
    )?;
    Ok(())
}

/// Mark a peer inactive. Its row is kept.
pub fn deactivate(conn: &Connection, identifier: &PeerId) -> Result<()> {
    conn.execute(
        "UPDATE masternode SET active = 0 WHERE identifier = ?1",
        [identifier.as_bytes().as_slice()],
    )?;
    Ok(())
}

pub fn list_active(conn: &Connection) -> Result<Vec<Peer>> {
    let mut stmt = conn.prepare(
        "SELECT identifier, address, active FROM masternode
         WHERE active = 1 ORDER BY identifier",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, address, active)| {
            Ok(Peer {
                identifier: PeerId::from_slice(&id)
                    .map_err(|e| DbError::CorruptRow(format!("identifier: {e}")))?,
                address: address
                    .parse::<SocketAddr>()
                    .map_err(|e| DbError::CorruptRow(format!("address {address}: {e}")))?,
                active,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8, port: u16) -> Peer {
        Peer::new(
            PeerId::from_bytes([n; 32]),
            format!("127.0.0.1:{port}").parse().expect("addr"),
        )
    }

    #[test]
    fn test_upsert_and_list() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &peer(1, 4001)).expect("p1");
        upsert(&conn, &peer(2, 4002)).expect("p2");
        let peers = list_active(&conn).expect("list");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], peer(1, 4001));
    }

    #[test]
    fn test_upsert_updates_address() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &peer(1, 4001)).expect("p1");
        upsert(&conn, &peer(1, 5001)).expect("p1 moved");
        let peers = list_active(&conn).expect("list");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address.port(), 5001);
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let conn = crate::open_memory().expect("open");
        let p = peer(3, 4003);
        upsert(&conn, &p).expect("insert");
        deactivate(&conn, &p.identifier).expect("deactivate");
        assert!(list_active(&conn).expect("list").is_empty());
        upsert(&conn, &p).expect("reactivate");
        assert_eq!(list_active(&conn).expect("list").len(), 1);
    }
}
