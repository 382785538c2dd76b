pub mod decode;
pub mod encode;
pub mod flow;
/// Server side of the Dovecot Authentication Protocol, so that the MTA
/// facing the submitters can delegate SMTP AUTH to the translator.
///
/// ## Trace
///
/// ```text
/// S: VERSION	1	2
/// S: MECH	PLAIN	plaintext
/// S: MECH	LOGIN	plaintext
/// S: MECH	CRAM-MD5	dictionary	active
/// S: SPID	15
/// S: CUID	17654
/// S: COOKIE	f56692bee41f471ed01bd83520025305
/// S: DONE
/// C: VERSION	1	2
/// C: CPID	1
///
/// C: AUTH	2	PLAIN	service=smtp
/// S: CONT	2
/// C: CONT	2   base64stringFollowingRFC4616==
/// S: OK	2	user=ryan
///
/// C: AUTH	42	CRAM-MD5	service=smtp
/// S: CONT	42	base64(<1896.697170952@smtp-translator>)
/// C: CONT	42	base64(ryan b913a602c7eda7a495b4e6e7334d3890)
/// S: FAIL	42	user=ryan
/// ```
///
/// ## RFC References
///
/// PLAIN SASL - https://datatracker.ietf.org/doc/html/rfc4616
/// CRAM-MD5 - https://datatracker.ietf.org/doc/html/rfc2195
///
/// ## Dovecot References
///
/// https://doc.dovecot.org/developer_manual/design/auth_protocol/
pub mod types;
